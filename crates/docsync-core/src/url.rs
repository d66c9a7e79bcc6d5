//! Connection URL building.

/// Build the realtime endpoint URL from the short-lived base URL and token,
/// appending the resume-point commit id when one is known.
///
/// `"wss://host/ws"` with token `"123"` becomes `"wss://host/ws/?token=123"`;
/// a commit id `"456"` appends `"&commitId=456"`.
#[must_use]
pub fn build_connection_url(server_url: &str, token: &str, commit_id: Option<&str>) -> String {
    let base = server_url.trim_end_matches('/');
    let mut url = format!("{base}/?token={token}");
    if let Some(commit_id) = commit_id {
        url.push_str("&commitId=");
        url.push_str(commit_id);
    }
    url
}
