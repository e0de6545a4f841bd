//! Phone Pilot - skill-driven Android phone automation
//!
//! This is the CLI entry point for the phone-pilot tool.
//! Run with: cargo run --bin phone-pilot -- "<task>"

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use phone_pilot::{
    ClusterRunner, CoordinationConfig, DeviceEndpoint, ModelConfig, PilotAgent, PilotConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();

    // Model configuration (used by the vision analyzer / OCR backend)
    let base_url =
        env::var("MODEL_BASE_URL").unwrap_or_else(|_| "http://localhost:8000/v1".to_string());
    let api_key = env::var("MODEL_API_KEY").unwrap_or_else(|_| "EMPTY".to_string());
    let model_name = env::var("MODEL_NAME").unwrap_or_else(|_| "glm-4v-flash".to_string());
    let model_config = ModelConfig::default()
        .with_base_url(&base_url)
        .with_api_key(&api_key)
        .with_model_name(&model_name);

    // Agent configuration
    let device_id = env::var("ADB_DEVICE_ID").ok();
    let skill_paths: Vec<PathBuf> = env::var("SKILL_PATHS")
        .unwrap_or_else(|_| "skills".to_string())
        .split(',')
        .map(|p| PathBuf::from(p.trim()))
        .collect();

    let mut pilot_config = PilotConfig::default().with_skill_paths(skill_paths);
    pilot_config.device_id = device_id;
    pilot_config.ocr_provider = env::var("OCR_PROVIDER").ok();
    pilot_config.dry_run = env_flag("DRY_RUN");
    pilot_config.risk_gate_enabled = env_flag("SKILL_RISK_GATE");
    if let Ok(dir) = env::var("SKILL_RECORD_DIR") {
        pilot_config.record_dir = Some(PathBuf::from(dir));
    }
    if let Ok(dir) = env::var("SKILL_PLAYBACK_DIR") {
        pilot_config.playback_dir = Some(PathBuf::from(dir));
    }
    if let Ok(path) = env::var("SKILL_COMMON_HANDLERS") {
        pilot_config.common_handlers_path = Some(PathBuf::from(path));
    }
    if let Ok(whitelist) = env::var("SKILL_WHITELIST") {
        pilot_config.skill_whitelist = whitelist
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    let mut coordination = CoordinationConfig::default();
    coordination.system2.enable_vision_recovery = env_flag("ENABLE_VISION_RECOVERY");
    coordination.system1.enable_liveness = env_flag("ENABLE_LIVENESS");

    // Cluster mode: --devices id1,id2,...
    let devices_arg = args
        .iter()
        .position(|arg| arg == "--devices")
        .and_then(|i| args.get(i + 1))
        .cloned();
    let task_arg = args
        .iter()
        .skip(1)
        .find(|arg| !arg.starts_with("--") && Some(arg.as_str()) != devices_arg.as_deref())
        .cloned();

    if let Some(devices) = devices_arg {
        let endpoints: Vec<DeviceEndpoint> = devices
            .split(',')
            .map(|id| DeviceEndpoint::new(id.trim()))
            .collect();
        let task = match task_arg {
            Some(task) => task,
            None => prompt_task()?,
        };
        let runner = ClusterRunner::new(endpoints, model_config, pilot_config, coordination);
        let results = runner.run(&task).await;
        for (device, outcome) in results {
            println!("[{}] {}", device, outcome);
        }
        return Ok(());
    }

    let mut agent = PilotAgent::new(model_config, pilot_config, coordination, None, None)?;
    for error in agent.skill_errors() {
        eprintln!("warning: {}", error);
    }

    match task_arg {
        Some(task) => {
            let result = agent.run(&task).await;
            println!("{}", result);
        }
        None => loop {
            let task = prompt_task()?;
            if task.is_empty() || task == "exit" || task == "quit" {
                break;
            }
            let result = agent.run(&task).await;
            println!("{}", result);
        },
    }

    Ok(())
}

fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn prompt_task() -> anyhow::Result<String> {
    print!("task> ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
