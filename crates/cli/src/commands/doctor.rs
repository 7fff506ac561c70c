use parley_core::config::{AgentProvider, AppConfig, LoadOptions};
use parley_db::{connect_with_config, migrations};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_agent_provider(&config));
            checks.push(check_platform(&config));
            checks.push(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["agent_provider", "platform_delivery", "database_schema"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_agent_provider(config: &AppConfig) -> DoctorCheck {
    let (status, details) = match config.agent.provider {
        AgentProvider::Scripted => (
            CheckStatus::Warn,
            "scripted provider returns canned drafts; use only for local testing".to_string(),
        ),
        provider => (
            CheckStatus::Pass,
            format!("{} with model `{}`", provider.as_str(), config.agent.model),
        ),
    };
    DoctorCheck { name: "agent_provider", status, details }
}

fn check_platform(config: &AppConfig) -> DoctorCheck {
    if !config.platform.delivery_enabled() {
        return DoctorCheck {
            name: "platform_delivery",
            status: CheckStatus::Warn,
            details: "platform.api_base_url unset; approved replies will not be delivered".to_string(),
        };
    }
    if config.platform.webhook_secret.is_none() {
        return DoctorCheck {
            name: "platform_delivery",
            status: CheckStatus::Warn,
            details: "platform.webhook_secret unset; inbound webhooks are not authenticated"
                .to_string(),
        };
    }
    DoctorCheck {
        name: "platform_delivery",
        status: CheckStatus::Pass,
        details: "delivery and webhook verification configured".to_string(),
    }
}

fn check_database(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "database_schema",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        let applied = migrations::run_pending(&pool)
            .await
            .map_err(|error| format!("migrations failed: {error}"));
        pool.close().await;
        applied
    });

    match result {
        Ok(()) => DoctorCheck {
            name: "database_schema",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`; schema is current", config.database.url),
        },
        Err(error) => DoctorCheck { name: "database_schema", status: CheckStatus::Fail, details: error },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
