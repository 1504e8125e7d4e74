/// Builds the conventional metric namespace prefix in the form `environment.app.hostname.`.
///
/// Dots in the hostname are replaced with underscores so they don't introduce spurious levels in
/// the metric namespace. The result ends with a trailing dot and can be handed directly to
/// [`StatsdBuilder::with_prefix`](crate::StatsdBuilder::with_prefix) or
/// [`StatsdClient::set_prefix`](crate::StatsdClient::set_prefix).
pub fn make_prefix(environment: &str, app: &str, hostname: &str) -> String {
    let hostname = hostname.replace('.', "_");
    format!("{environment}.{app}.{hostname}.")
}
