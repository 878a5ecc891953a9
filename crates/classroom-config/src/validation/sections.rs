//! Per-section validators: realtime, classroom and relay.

use crate::schema::ClassroomConfig;

use super::helpers::validate_range;

pub(crate) fn validate_realtime(errors: &mut Vec<String>, config: &ClassroomConfig) {
    let rt = &config.realtime;
    validate_range(errors, "realtime.heartbeat_interval", rt.heartbeat_interval, 5, 120);
    validate_range(errors, "realtime.reconnect_delay", rt.reconnect_delay, 1, 60);
    if rt.max_reconnect_delay < rt.reconnect_delay {
        errors.push(format!(
            "realtime.max_reconnect_delay = {} is below realtime.reconnect_delay = {}",
            rt.max_reconnect_delay, rt.reconnect_delay
        ));
    }
}

pub(crate) fn validate_classroom(errors: &mut Vec<String>, config: &ClassroomConfig) {
    let c = &config.classroom;
    if c.room_namespace.is_empty() {
        errors.push("classroom.room_namespace must not be empty".into());
    } else if c.room_namespace.contains('_') {
        errors.push(format!(
            "classroom.room_namespace = {:?} must not contain '_'",
            c.room_namespace
        ));
    }
    validate_range(
        errors,
        "classroom.milestone_interval",
        u64::from(c.milestone_interval),
        1,
        100,
    );
    validate_range(
        errors,
        "classroom.reconnect_failure_threshold",
        u64::from(c.reconnect_failure_threshold),
        1,
        20,
    );
    validate_range(
        errors,
        "classroom.resync_timeout_ms",
        c.resync_timeout_ms,
        250,
        60_000,
    );
}

pub(crate) fn validate_relay(errors: &mut Vec<String>, config: &ClassroomConfig) {
    let r = &config.relay;
    validate_range(errors, "relay.port", u64::from(r.port), 1, 65535);
    validate_range(errors, "relay.hello_timeout", r.hello_timeout, 1, 60);
    validate_range(errors, "relay.room_ttl", r.room_ttl, 60, 86_400);
}
