/// Audit macro for key lifecycle events.
///
/// This macro wraps `tracing::info!` and adds `audit=true` and
/// `auditType="key_lifecycle"` so that minting, restoring and evicting a
/// signing key can be filtered out of the regular log stream.
///
/// # Examples
///
/// ```
/// # let key_id = "1718000000000000000";
/// keywarden::audit!(key_id = %key_id, event = "minted", "signing key rotated in");
/// ```
#[macro_export]
macro_rules! audit {
    ($($arg:tt)+) => {
        ::tracing::info!(
            audit = true,
            auditType = "key_lifecycle",
            $($arg)+
        )
    };
}
