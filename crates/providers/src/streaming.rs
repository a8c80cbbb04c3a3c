//! Streaming chunk aggregation for TTFT/throughput.

use std::time::Instant;

use bg_domain::stream::{StreamEvent, Usage};

/// Accumulates a streaming response into the counters a benchmark result row
/// needs: time-to-first-token, total wall time, and token counts.
pub struct StreamAggregator {
    start: Instant,
    first_token_at: Option<Instant>,
    text: String,
    output_tokens_seen: u32,
    usage: Option<Usage>,
    finish_reason: Option<String>,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            first_token_at: None,
            text: String::new(),
            output_tokens_seen: 0,
            usage: None,
            finish_reason: None,
        }
    }

    /// Feed one event; call in arrival order.
    pub fn on_event(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Token { text } => {
                if self.first_token_at.is_none() && !text.is_empty() {
                    self.first_token_at = Some(Instant::now());
                }
                self.text.push_str(text);
                self.output_tokens_seen += 1;
            }
            StreamEvent::Done { usage, finish_reason } => {
                self.usage = usage.clone();
                self.finish_reason = finish_reason.clone();
            }
            _ => {}
        }
    }

    pub fn ttft_ms(&self) -> Option<u64> {
        self.first_token_at
            .map(|t| t.duration_since(self.start).as_millis() as u64)
    }

    pub fn total_time_s(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Prefer the provider's reported usage; fall back to the token-event
    /// count when a provider doesn't send `usage` on streamed responses.
    pub fn output_tokens(&self) -> u32 {
        self.usage
            .as_ref()
            .map(|u| u.completion_tokens)
            .unwrap_or(self.output_tokens_seen)
    }

    pub fn input_tokens(&self) -> Option<u32> {
        self.usage.as_ref().map(|u| u.prompt_tokens)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }
}

impl Default for StreamAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttft_is_none_until_first_nonempty_token() {
        let mut agg = StreamAggregator::new();
        agg.on_event(&StreamEvent::Token { text: String::new() });
        assert!(agg.ttft_ms().is_none());
        agg.on_event(&StreamEvent::Token { text: "hi".into() });
        assert!(agg.ttft_ms().is_some());
    }

    #[test]
    fn text_accumulates_in_order() {
        let mut agg = StreamAggregator::new();
        agg.on_event(&StreamEvent::Token { text: "a".into() });
        agg.on_event(&StreamEvent::Token { text: "b".into() });
        assert_eq!(agg.text(), "ab");
        assert_eq!(agg.output_tokens(), 2);
    }

    #[test]
    fn usage_from_done_event_overrides_token_count() {
        let mut agg = StreamAggregator::new();
        agg.on_event(&StreamEvent::Token { text: "a".into() });
        agg.on_event(&StreamEvent::Done {
            usage: Some(Usage { prompt_tokens: 10, completion_tokens: 99, total_tokens: 109 }),
            finish_reason: Some("stop".into()),
        });
        assert_eq!(agg.output_tokens(), 99);
        assert_eq!(agg.input_tokens(), Some(10));
        assert_eq!(agg.finish_reason(), Some("stop"));
    }
}
