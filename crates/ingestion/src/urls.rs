//! Build export API endpoints

/// Top-level build notification stream starting at `start_time`
/// (`now` or epoch milliseconds).
pub fn builds_since_url(server_url: &str, start_time: &str) -> String {
    format!("{server_url}/build-export/v1/builds/since/{start_time}?stream")
}

/// Per-build timeline stream, filtered to `event_types`
pub fn build_events_url<S: AsRef<str>>(
    server_url: &str,
    build_id: &str,
    event_types: &[S],
) -> String {
    let types = event_types
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(",");
    format!("{server_url}/build-export/v1/build/{build_id}/events?eventTypes={types}")
}
