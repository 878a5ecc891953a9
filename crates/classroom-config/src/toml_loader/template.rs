//! Default TOML config template with inline documentation comments.

pub(crate) fn default_config_toml() -> String {
    r##"# Classroom sync configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[realtime]
# project_ref = ""
# api_key = ""
# heartbeat_interval = 25    # seconds, 5-120
# reconnect_delay = 1        # seconds, 1-60
# max_reconnect_delay = 30   # seconds, >= reconnect_delay

[classroom]
# room_namespace = "classroom"     # no underscores
# milestone_interval = 5           # 1-100
# reconnect_failure_threshold = 3  # 1-20
# enforce_roles = true
# resync_timeout_ms = 3000         # 250-60000

[relay]
# bind = "0.0.0.0"
# port = 8787
# hello_timeout = 10   # seconds, 1-60
# room_ttl = 3600      # seconds without a teacher before a room is reaped

[logging]
# level = "INFO"       # DEBUG, INFO, WARNING, ERROR
"##
    .to_string()
}
