/// Run `$body` inside an `info` span named after the stage.
///
/// # Examples
/// ```rs
/// stage!(mtab "Fixing /etc/mtab" {
///     fix_mtab()?;
/// });
/// ```
#[macro_export]
macro_rules! stage {
    ($s:ident $msg:literal $body:block) => {{
        let s = tracing::info_span!(concat!("stage-", stringify!($s)));

        {
            let _guard = s.enter();
            tracing::debug!($msg);
            $body
        }
    }};
}
