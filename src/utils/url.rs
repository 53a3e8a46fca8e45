//! Endpoint URL joining.

/// Strips trailing slashes from a provider base URL.
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Joins a base URL and an endpoint path with exactly one slash between them.
/// The endpoint may carry a query string (`models/x:streamGenerateContent?alt=sse`).
///
/// ```
/// use streamscribe::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://api.openai.com/v1/", "/chat/completions"),
///     "https://api.openai.com/v1/chat/completions"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{base}/{endpoint}")
}
