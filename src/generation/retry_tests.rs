//! Tests for the retrying generator

#[cfg(test)]
mod tests {
    use crate::generation::client::TransportError;
    use crate::generation::handler::{handler, GenerationOutput, IntegerInRange, OneOf};
    use crate::generation::mock::MockGenerationClient;
    use crate::generation::request::{FieldKind, GenerationParams, GenerationRequest, SchemaDescriptor};
    use crate::generation::retry::*;
    use anyhow::anyhow;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn generator(mock: &MockGenerationClient) -> RetryingGenerator {
        RetryingGenerator::new(Arc::new(mock.clone()), GeneratorOptions::default())
    }

    fn plain_request() -> GenerationRequest {
        GenerationRequest::new("Rate the poignancy of: ate breakfast", GenerationParams::default())
    }

    fn structured_request() -> GenerationRequest {
        GenerationRequest::new("Next action?", GenerationParams::default()).with_schema(
            SchemaDescriptor::new("action")
                .field("action", FieldKind::String)
                .field("location", FieldKind::String),
        )
    }

    #[tokio::test]
    async fn test_always_false_validator_exhausts_budget() {
        let mock = MockGenerationClient::new();
        mock.set_fallback(Ok(crate::generation::RawPayload::Text("whatever".to_string())));
        let never = handler(|_: &GenerationOutput| false, |_: &GenerationOutput| Ok(1));

        let result = generator(&mock)
            .generate(&plain_request(), &never, 42, 5)
            .await;

        assert!(!result.success);
        assert_eq!(result.value, 42);
        assert_eq!(result.attempts, 5);
        assert_eq!(mock.call_count(), 5);
        assert_eq!(result.count(RejectionReason::Validation), 5);
        assert_eq!(result.last_raw.as_deref(), Some("whatever"));
        assert_eq!(result.prompt, plain_request().prompt);
    }

    #[tokio::test]
    async fn test_short_circuits_on_first_valid_output() {
        let mock = MockGenerationClient::new();
        mock.push_text("eleven").push_text("99").push_text("7").push_text("3");

        let result = generator(&mock)
            .generate(&plain_request(), &IntegerInRange::new(1, 10), 4, 6)
            .await;

        assert!(result.success);
        assert_eq!(result.value, 7);
        assert_eq!(result.attempts, 3);
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.remaining(), 1);
    }

    #[tokio::test]
    async fn test_zero_budget_never_calls_client() {
        let mock = MockGenerationClient::new();
        mock.push_text("5");

        let result = generator(&mock)
            .generate(&plain_request(), &IntegerInRange::new(1, 10), 4, 0)
            .await;

        assert!(!result.success);
        assert_eq!(result.value, 4);
        assert_eq!(result.attempts, 0);
        assert_eq!(mock.call_count(), 0);
        assert!(result.last_raw.is_none());
    }

    #[tokio::test]
    async fn test_transport_and_empty_outputs_consume_attempts() {
        let mock = MockGenerationClient::new();
        mock.push_failure(TransportError::Timeout(std::time::Duration::from_secs(30)))
            .push_text("   ")
            .push_text("6");

        let result = generator(&mock)
            .generate(&plain_request(), &IntegerInRange::new(1, 10), 4, 3)
            .await;

        assert!(result.success);
        assert_eq!(result.value, 6);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.count(RejectionReason::Transport), 1);
        assert_eq!(result.count(RejectionReason::Empty), 1);
    }

    #[tokio::test]
    async fn test_failing_transform_is_a_failed_attempt() {
        let mock = MockGenerationClient::new();
        mock.push_text("first").push_text("second");
        let flaky = handler(
            |_: &GenerationOutput| true,
            |o: &GenerationOutput| {
                if o.text() == "first" {
                    Err(anyhow!("could not convert"))
                } else {
                    Ok(o.text().to_uppercase())
                }
            },
        );

        let result = generator(&mock)
            .generate(&plain_request(), &flaky, String::from("idle"), 3)
            .await;

        assert!(result.success);
        assert_eq!(result.value, "SECOND");
        assert_eq!(result.attempts, 2);
        assert_eq!(result.failures[0].reason, RejectionReason::Transform);
        assert!(result.failures[0].detail.contains("could not convert"));
    }

    #[tokio::test]
    async fn test_schema_failures_are_distinct_from_validation() {
        let mock = MockGenerationClient::new();
        mock.push_text("I think they should go to sleep.")
            .push_text(r#"{"action": "sleep", "location": "moon"}"#)
            .push_text(r#"{"action": "sleep"}"#);
        let site = OneOf::new(["bedroom", "kitchen"]).in_field("location");

        let result = generator(&mock)
            .generate(&structured_request(), &site, "bedroom".to_string(), 3)
            .await;

        assert!(!result.success);
        assert_eq!(result.value, "bedroom");
        assert_eq!(result.attempts, 3);
        assert_eq!(result.count(RejectionReason::Schema), 2);
        assert_eq!(result.count(RejectionReason::Validation), 1);
    }

    #[tokio::test]
    async fn test_structured_success_exposes_fields() {
        let mock = MockGenerationClient::new();
        mock.push_text("```json\n{\"action\": \"cook\", \"location\": \"Kitchen\"}\n```");
        let site = OneOf::new(["bedroom", "kitchen"]).in_field("location");

        let result = generator(&mock)
            .generate(&structured_request(), &site, "bedroom".to_string(), 2)
            .await;

        assert!(result.success);
        assert_eq!(result.value, "kitchen");
        assert!(result.failures.is_empty());
    }

    #[tokio::test]
    async fn test_stats_accumulate_across_calls() {
        let mock = MockGenerationClient::new();
        mock.push_text("3").push_text("x").push_text("y");
        let gen = generator(&mock);
        let h = IntegerInRange::new(1, 10);

        gen.generate(&plain_request(), &h, 4, 2).await;
        gen.generate(&plain_request(), &h, 4, 2).await;

        let stats = gen.stats().await;
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.fail_safes, 1);
        assert_eq!(stats.validation_failures, 2);
        assert_eq!(stats.fail_safe_ratio(), 0.5);
    }

    #[tokio::test]
    async fn test_call_site_invoke_builds_request() {
        let mock = MockGenerationClient::new();
        mock.push_text("8");
        let site = CallSite::new(
            "poignancy",
            GenerationParams::default().with_max_output_size(3),
            IntegerInRange::new(1, 10),
            4i64,
            3,
        );

        let result = site.invoke(&generator(&mock), "rate: woke up").await;

        assert_eq!(result.into_value(), 8);
        let sent = mock.get_call_history();
        assert_eq!(sent[0].prompt, "rate: woke up");
        assert_eq!(sent[0].params.max_output_size, 3);
    }

    fn run<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    proptest! {
        #[test]
        fn prop_always_false_makes_exactly_n_attempts(n in 1u32..12) {
            let mock = MockGenerationClient::new();
            mock.set_fallback(Ok(crate::generation::RawPayload::Text("out".to_string())));
            let never = handler(|_: &GenerationOutput| false, |_: &GenerationOutput| Ok(0u8));

            let result = run(generator(&mock).generate(&plain_request(), &never, 9u8, n));

            prop_assert!(!result.success);
            prop_assert_eq!(result.value, 9);
            prop_assert_eq!(result.attempts, n);
            prop_assert_eq!(mock.call_count(), n as usize);
        }

        #[test]
        fn prop_valid_at_k_stops_at_k((n, k) in (1u32..12).prop_flat_map(|n| (Just(n), 1..=n))) {
            let mock = MockGenerationClient::new();
            for i in 1..=n {
                if i == k {
                    mock.push_text("5");
                } else {
                    mock.push_text("not a number");
                }
            }

            let result = run(generator(&mock).generate(&plain_request(), &IntegerInRange::new(1, 10), 1, n));

            prop_assert!(result.success);
            prop_assert_eq!(result.value, 5);
            prop_assert_eq!(result.attempts, k);
            prop_assert_eq!(mock.call_count(), k as usize);
        }

        #[test]
        fn prop_mixed_rejections_never_exceed_budget(
            n in 1u32..10,
            script in prop::collection::vec(0u8..3, 0..20),
        ) {
            let mock = MockGenerationClient::new();
            for kind in &script {
                match kind {
                    0 => mock.push_text("no json here"),
                    1 => mock.push_text(r#"{"action": "nap", "location": "attic"}"#),
                    _ => mock.push_failure(TransportError::Unreachable("down".to_string())),
                };
            }
            mock.set_fallback(Ok(crate::generation::RawPayload::Text("{}".to_string())));
            let site = OneOf::new(["bedroom"]).in_field("location");

            let result = run(generator(&mock).generate(&structured_request(), &site, "bedroom".to_string(), n));

            prop_assert!(!result.success);
            prop_assert_eq!(result.attempts, n);
            prop_assert_eq!(result.failures.len(), n as usize);
            prop_assert_eq!(mock.call_count(), n as usize);
        }
    }
}
