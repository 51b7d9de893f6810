use std::path::Path;
use std::process::Command;

use fswap_media::check_tool;
use fswap_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;
    ensure_ffmpeg(&config.ffmpeg_program)?;
    for program in [&config.convert_program, &config.python_program] {
        let path = check_tool(program).map_err(|e| anyhow::anyhow!("{}", e))?;
        println!("worker-selfcheck: found {} at {}", program, path.display());
    }
    ensure_script(&config.work_dir.join(&config.facefusion_script))?;
    ensure_env_present(&["TASK_API_BASE_URL"])?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

fn ensure_ffmpeg(program: &str) -> anyhow::Result<()> {
    let output = Command::new(program)
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("{} not available: {}", program, e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "{} -version failed: {:?}",
            program,
            output.status
        ));
    }
    Ok(())
}

fn ensure_script(path: &Path) -> anyhow::Result<()> {
    if !path.is_file() {
        return Err(anyhow::anyhow!("FaceFusion entry script not found at {}", path.display()));
    }
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
