use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Register metric descriptions with the installed recorder.
pub fn init_metrics() {
    describe_counter!(
        "chassis_invocations_total",
        "Invocations completed by the invoker, by service and status"
    );
    describe_histogram!(
        "chassis_invocation_duration_seconds",
        "End-to-end invocation duration"
    );
    describe_counter!(
        "chassis_lb_selections_total",
        "Endpoint selections by strategy and service"
    );
    describe_counter!(
        "chassis_lb_retries_total",
        "Load balancer retry attempts by service"
    );
    describe_histogram!(
        "chassis_instance_latency_seconds",
        "Per-attempt latency observed by the load balancer"
    );
    describe_gauge!(
        "chassis_cb_state",
        "Circuit breaker state per command (0=closed, 1=open, 2=half_open)"
    );
    describe_counter!(
        "chassis_cb_state_transitions_total",
        "Circuit breaker state transitions"
    );
    describe_counter!(
        "chassis_cb_outcomes_total",
        "Protected call outcomes per command"
    );
    describe_counter!(
        "chassis_cb_rejections_total",
        "Calls short-circuited by a breaker, by reason"
    );
    describe_counter!(
        "chassis_rate_limited_total",
        "Requests rejected by a rate limiter"
    );
    describe_counter!("chassis_traffic_marks_total", "Invocations marked per policy");
    describe_counter!(
        "chassis_route_decisions_total",
        "Route decisions by service and destination tags"
    );
    describe_counter!(
        "chassis_faults_injected_total",
        "Injected faults by service and kind"
    );
}

/// Static recording helpers.
pub struct Metrics;

impl Metrics {
    pub fn record_invocation(service: &str, status: u16, duration: Duration) {
        counter!("chassis_invocations_total",
            "service" => service.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        histogram!("chassis_invocation_duration_seconds",
            "service" => service.to_string()
        )
        .record(duration.as_secs_f64());
    }

    pub fn record_lb_selection(strategy: &str, service: &str) {
        counter!("chassis_lb_selections_total",
            "strategy" => strategy.to_string(),
            "service" => service.to_string()
        )
        .increment(1);
    }

    pub fn record_lb_retry(service: &str) {
        counter!("chassis_lb_retries_total",
            "service" => service.to_string()
        )
        .increment(1);
    }

    pub fn record_instance_latency(service: &str, latency: Duration) {
        histogram!("chassis_instance_latency_seconds",
            "service" => service.to_string()
        )
        .record(latency.as_secs_f64());
    }

    pub fn set_cb_state(command: &str, state_code: u8) {
        gauge!("chassis_cb_state",
            "command" => command.to_string()
        )
        .set(state_code as f64);
    }

    pub fn record_cb_transition(command: &str, from: &str, to: &str) {
        counter!("chassis_cb_state_transitions_total",
            "command" => command.to_string(),
            "from" => from.to_string(),
            "to" => to.to_string()
        )
        .increment(1);
    }

    pub fn record_cb_outcome(command: &str, outcome: &str) {
        counter!("chassis_cb_outcomes_total",
            "command" => command.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }

    pub fn record_cb_rejection(command: &str, reason: &str) {
        counter!("chassis_cb_rejections_total",
            "command" => command.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    pub fn record_rate_limited(limiter: &str) {
        counter!("chassis_rate_limited_total",
            "limiter" => limiter.to_string()
        )
        .increment(1);
    }

    pub fn record_traffic_mark(policy: &str) {
        counter!("chassis_traffic_marks_total",
            "policy" => policy.to_string()
        )
        .increment(1);
    }

    pub fn record_route_decision(service: &str, tags: &str) {
        counter!("chassis_route_decisions_total",
            "service" => service.to_string(),
            "tags" => tags.to_string()
        )
        .increment(1);
    }

    pub fn record_fault_injected(service: &str, kind: &str) {
        counter!("chassis_faults_injected_total",
            "service" => service.to_string(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }
}
