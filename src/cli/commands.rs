//! CLI command implementations

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::info;

use crate::client::{
    stream_download, ByteRange, DeleteResult, DownloadEvent, DownloadReporter, HyperTransport,
    RequestExecutor, StatResult,
};
use crate::config::Config;
use crate::multipart::{MultipartUpload, UploadOutcome, UploadRequest};
use crate::sign::{self, Method, SignOptions, SignQueryOptions};

/// File-read chunk size for uploads
const READ_CHUNK: usize = 256 * 1024;

/// Build an executor from the selected profile.
pub fn executor_for(config: &Config, insecure: bool) -> Result<RequestExecutor> {
    let profile = config
        .get_profile(None)
        .context("No profile found in configuration")?;
    let credentials = profile.credentials();
    let transport = Arc::new(HyperTransport::new(!insecure));
    Ok(RequestExecutor::new(credentials, transport))
}

/// Print a presigned URL for `path`.
pub fn cmd_presign(config: &Config, path: &str, method: &str, expires: u32) -> Result<()> {
    let profile = config
        .get_profile(None)
        .context("No profile found in configuration")?;
    let credentials = profile.credentials();

    let method: Method = method
        .to_uppercase()
        .parse()
        .map_err(|e: crate::error::S3Error| anyhow::anyhow!("{e}"))?;
    let options = SignOptions {
        path,
        method: Some(method),
        acl: config.upload.acl,
        ..Default::default()
    };
    let query = SignQueryOptions { expires };
    let result = sign::sign_query(&credentials, &options, &query)
        .map_err(|e| anyhow::anyhow!("{}: {e}", e.code()))?;

    println!("{}", result.url);
    Ok(())
}

/// Upload a local file (or stdin with `-`) through the multipart
/// pipeline.
pub async fn cmd_put(
    config: &Config,
    source: &str,
    dest: &str,
    content_type: Option<String>,
    insecure: bool,
) -> Result<()> {
    let executor = executor_for(config, insecure)?;
    let options = config.upload.options()?;

    let (tx, rx) = tokio::sync::oneshot::channel();
    let request = UploadRequest {
        path: dest.to_string(),
        content_type,
        acl: config.upload.acl,
        proxy: None,
        wait_stream_check: false,
    };
    let upload = MultipartUpload::start(
        executor,
        request,
        options,
        Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }),
    );

    let mut total = 0u64;
    let mut buf = vec![0u8; READ_CHUNK];
    if source == "-" {
        let mut stdin = tokio::io::stdin();
        loop {
            let n = stdin.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            upload
                .write(&buf[..n])
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
        }
    } else {
        let mut file = tokio::fs::File::open(source)
            .await
            .context(format!("Failed to open {source}"))?;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;
            upload
                .write(&buf[..n])
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
        }
    }
    upload.end();

    match rx.await? {
        UploadOutcome::Success => {
            info!(bytes = total, dest = %dest, "upload complete");
            println!("uploaded {total} bytes to {dest}");
            Ok(())
        }
        UploadOutcome::Failure(err) => bail!("upload failed: {err}"),
    }
}

/// Download an object to a file (or stdout with `-`), streaming.
pub async fn cmd_get(
    config: &Config,
    path: &str,
    output: &str,
    offset: Option<u64>,
    size: Option<u64>,
    insecure: bool,
) -> Result<()> {
    let executor = executor_for(config, insecure)?;
    let range = offset.map(|offset| ByteRange { offset, size });

    let to_stdout = output == "-";
    let mut writer: Box<dyn Write + Send> = if to_stdout {
        Box::new(std::io::stdout())
    } else {
        let file = std::fs::File::create(output).context(format!("Failed to create {output}"))?;
        Box::new(std::io::BufWriter::with_capacity(READ_CHUNK, file))
    };

    let (tx, rx) = tokio::sync::oneshot::channel();
    let mut tx = Some(tx);
    let mut total = 0u64;
    let reporter: DownloadReporter = Box::new(move |event| match event {
        DownloadEvent::Chunk { data, has_more } => {
            total += data.len() as u64;
            let written = writer.write_all(&data).and_then(|_| {
                if has_more {
                    Ok(())
                } else {
                    writer.flush()
                }
            });
            match written {
                Ok(()) if !has_more => {
                    if let Some(tx) = tx.take() {
                        let _ = tx.send(Ok(total));
                    }
                }
                Ok(()) => {}
                Err(e) => {
                    if let Some(tx) = tx.take() {
                        let _ = tx.send(Err(anyhow::anyhow!("write failed: {e}")));
                    }
                }
            }
        }
        DownloadEvent::Failure(err) => {
            if let Some(tx) = tx.take() {
                let _ = tx.send(Err(anyhow::anyhow!("{err}")));
            }
        }
    });

    stream_download(&executor, path, range, reporter).await;

    let total = rx.await??;
    if !to_stdout {
        println!("downloaded {total} bytes to {output}");
    }
    Ok(())
}

/// Show object metadata.
pub async fn cmd_stat(config: &Config, path: &str, insecure: bool) -> Result<()> {
    let executor = executor_for(config, insecure)?;
    match executor.stat(path).await {
        StatResult::Success {
            etag,
            content_length,
        } => {
            println!("path: {path}");
            println!("size: {content_length}");
            println!("etag: {etag}");
            Ok(())
        }
        StatResult::NotFound(err) => bail!("not found: {err}"),
        StatResult::Failure(err) => bail!("stat failed: {err}"),
    }
}

/// Delete an object.
pub async fn cmd_rm(config: &Config, path: &str, insecure: bool) -> Result<()> {
    let executor = executor_for(config, insecure)?;
    match executor.delete(path).await {
        DeleteResult::Success => {
            println!("deleted {path}");
            Ok(())
        }
        DeleteResult::NotFound(err) => bail!("not found: {err}"),
        DeleteResult::Failure(err) => bail!("delete failed: {err}"),
    }
}
