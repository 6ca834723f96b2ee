use std::path::{Path, PathBuf};

fn ffmpeg_path() -> PathBuf {
    let mut path = Path::new("ffmpeg").to_path_buf();
    if cfg!(windows) {
        path.set_extension("exe");
    }

    path
}

/// Concat segment files into one output using the ffmpeg concat demuxer.
pub async fn merge_segments(segments: &[PathBuf], output: &Path) -> Result<(), String> {
    // Generate the ffmpeg concat input list next to the output.
    let list_path = output.with_extension("txt");
    let mut list = String::new();
    for segment in segments {
        list.push_str(&format!("file '{}'\n", segment.display()));
    }
    tokio::fs::write(&list_path, list)
        .await
        .map_err(|e| format!("Write concat list failed: {e}"))?;

    let args = vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list_path.display().to_string(),
        "-c".to_string(),
        "copy".to_string(),
        output.display().to_string(),
    ];
    let result = run_ffmpeg(&args).await;

    let _ = tokio::fs::remove_file(&list_path).await;
    result
}

/// Copy every input into one MP4 container without re-encoding.
pub async fn transmux_to_mp4(inputs: &[PathBuf], output: &Path) -> Result<(), String> {
    let mut args = vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
    ];
    for input in inputs {
        args.push("-i".to_string());
        args.push(input.display().to_string());
    }
    args.extend([
        "-c".to_string(),
        "copy".to_string(),
        "-bsf:a".to_string(),
        "aac_adtstoasc".to_string(),
        output.display().to_string(),
    ]);
    run_ffmpeg(&args).await
}

async fn run_ffmpeg(args: &[String]) -> Result<(), String> {
    log::info!("Spawning ffmpeg {}", args.join(" "));
    let output = tokio::process::Command::new(ffmpeg_path())
        .args(args)
        .output()
        .await
        .map_err(|e| format!("Spawn ffmpeg failed: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "ffmpeg exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(())
}
