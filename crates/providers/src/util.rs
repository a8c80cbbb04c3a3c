//! Shared utility functions for provider adapters.

use bg_domain::error::Error;

/// Convert a [`reqwest::Error`] into a provider error, tagged with which
/// provider it came from so the error sanitizer can scope it.
pub(crate) fn from_reqwest(provider_id: &str, e: reqwest::Error) -> Error {
    Error::Provider {
        provider: provider_id.to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_as_provider_error() {
        let client = reqwest::Client::new();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let err = rt.block_on(async {
            client
                .get("http://127.0.0.1:1")
                .timeout(std::time::Duration::from_millis(1))
                .send()
                .await
                .unwrap_err()
        });
        let wrapped = from_reqwest("openai", err);
        assert_eq!(wrapped.kind(), "provider_error");
    }
}
