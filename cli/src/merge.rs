use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Concatenate segment files into `output` by raw byte append.
///
/// Works for MPEG-TS segments, which are valid back to back; fMP4 streams
/// need the ffmpeg merge instead.
pub async fn concat_files(segments: &[PathBuf], output: &Path) -> Result<(), std::io::Error> {
    let mut out = File::create(output).await?;
    for segment in segments {
        let mut input = File::open(segment).await?;
        tokio::io::copy(&mut input, &mut out).await?;
    }
    out.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_concat_files_preserves_order() {
        let dir = std::env::temp_dir().join(format!("hlsdl-merge-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let a = dir.join("a.ts");
        let b = dir.join("b.ts");
        tokio::fs::write(&a, b"first;").await.unwrap();
        tokio::fs::write(&b, b"second").await.unwrap();

        let merged = dir.join("out.ts");
        concat_files(&[a, b], &merged).await.unwrap();

        assert_eq!(tokio::fs::read(&merged).await.unwrap(), b"first;second");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
