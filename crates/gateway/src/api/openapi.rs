use utoipa::OpenApi;

/// OpenAPI document served at `/api-doc/openapi.json` and browsable at
/// `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Sentinel Gateway",
        description = "Operator query/command surface for the Sentinel decision pipeline."
    ),
    paths(
        super::health::health,
        super::metrics::prometheus,
        super::metrics::summary,
        super::metrics::stages,
        super::metrics::latency,
        super::tracks::list_tracks,
        super::tracks::get_track,
        super::tracks::track_history,
        super::proposals::list_proposals,
        super::proposals::get_proposal,
        super::proposals::decide,
        super::decisions::list_decisions,
        super::effects::list_effects,
        super::audit::list_audit,
        super::admin::clear,
        super::sensor::get_config,
        super::sensor::patch_config,
        super::sensor::reset_config,
        super::rules::list_rules,
        super::rules::create_rule,
        super::rules::get_rule,
        super::rules::update_rule,
        super::rules::delete_rule,
    ),
    tags(
        (name = "Health", description = "Liveness and dependency status"),
        (name = "Tracks", description = "Fused track picture"),
        (name = "Proposals", description = "Action proposals and adjudication"),
        (name = "Decisions", description = "Recorded human decisions"),
        (name = "Effects", description = "Executed effects"),
        (name = "Audit", description = "Write-once audit log"),
        (name = "Metrics", description = "Aggregated and per-process metrics"),
        (name = "Sensor", description = "Sensor runtime configuration"),
        (name = "Rules", description = "Human-intervention rules"),
        (name = "Admin", description = "Development-only administration"),
    )
)]
pub struct ApiDoc;
