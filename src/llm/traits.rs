use super::types::CallBudget;
use std::future::Future;
use std::pin::Pin;

/// A text-generation provider behind a uniform invocation interface.
///
/// Implementations return `anyhow::Result` with contextual chains; the
/// router maps failures onto the crate taxonomy at its boundary.
pub trait Provider: Send + Sync {
    /// Provider identifier (e.g. "anthropic", "openai").
    fn name(&self) -> &str;

    /// Produce the completion text for one system + user prompt pair under
    /// the given budget. No retry behavior here; the router owns that.
    fn complete<'a>(
        &'a self,
        system_prompt: Option<&'a str>,
        message: &'a str,
        budget: &'a CallBudget,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;
}

/// Check if an error is non-retryable (client errors that won't resolve with
/// retries).
pub(crate) fn is_non_retryable(err: &anyhow::Error) -> bool {
    let msg = err.to_string();
    if is_quota_exhausted(&msg) {
        return true;
    }

    // Check for reqwest status errors (returned by .error_for_status())
    if let Some(reqwest_err) = err.downcast_ref::<reqwest::Error>()
        && let Some(status) = reqwest_err.status()
    {
        let code = status.as_u16();
        // 4xx client errors are non-retryable, except:
        // - 429 Too Many Requests (rate limiting, transient)
        // - 408 Request Timeout (transient)
        return status.is_client_error() && code != 429 && code != 408;
    }
    // String fallback: scan for any 4xx status code in error message
    for word in msg.split(|c: char| !c.is_ascii_digit()) {
        if let Ok(code) = word.parse::<u16>()
            && (400..500).contains(&code)
        {
            return code != 429 && code != 408;
        }
    }
    false
}

fn is_quota_exhausted(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("insufficient_quota")
        || lower.contains("exceeded your current quota")
        || lower.contains("billing")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_retryable_detects_common_patterns() {
        assert!(is_non_retryable(&anyhow::anyhow!("400 Bad Request")));
        assert!(is_non_retryable(&anyhow::anyhow!("401 Unauthorized")));
        assert!(is_non_retryable(&anyhow::anyhow!("403 Forbidden")));
        assert!(is_non_retryable(&anyhow::anyhow!(
            "API error with 404 Not Found"
        )));
        // Retryable: rate limiting and timeouts
        assert!(!is_non_retryable(&anyhow::anyhow!("429 Too Many Requests")));
        assert!(!is_non_retryable(&anyhow::anyhow!("408 Request Timeout")));
        // Retryable: 5xx and transport errors
        assert!(!is_non_retryable(&anyhow::anyhow!(
            "500 Internal Server Error"
        )));
        assert!(!is_non_retryable(&anyhow::anyhow!("connection reset")));
    }

    #[test]
    fn quota_exhaustion_is_terminal_even_behind_429() {
        assert!(is_non_retryable(&anyhow::anyhow!(
            "{}",
            "API error (429 Too Many Requests): {\"error\":{\"message\":\"You exceeded your current quota\",\"type\":\"insufficient_quota\"}}"
        )));
    }
}
