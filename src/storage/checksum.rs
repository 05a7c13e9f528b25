//! Single-pass copy with MD5 accumulation.
//!
//! Both the upload pipeline (async, from the request body) and the unzip
//! pipeline (blocking, inside `spawn_blocking`) stream through a 64 KiB
//! buffer while feeding the same digest. Bytes written always equal bytes
//! hashed equal the returned size.

use std::io::{Read, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{AppError, AppResult};

const BUFFER_SIZE: usize = 64 * 1024;

/// Streams `reader` to `writer`, returning `(size, md5_hex)` at EOF.
pub async fn copy_checksum<R, W>(reader: &mut R, writer: &mut W) -> AppResult<(i64, String)>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut size: i64 = 0;
    let mut ctx = md5::Context::new();

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        ctx.consume(&buf[..n]);
        size += n as i64;
    }
    writer.flush().await?;

    Ok((size, format!("{:x}", ctx.compute())))
}

/// Blocking variant for use on the blocking thread pool.
pub fn copy_checksum_blocking<R, W>(reader: &mut R, writer: &mut W) -> AppResult<(i64, String)>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut size: i64 = 0;
    let mut ctx = md5::Context::new();

    loop {
        let n = reader.read(&mut buf).map_err(AppError::Io)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).map_err(AppError::Io)?;
        ctx.consume(&buf[..n]);
        size += n as i64;
    }
    writer.flush().map_err(AppError::Io)?;

    Ok((size, format!("{:x}", ctx.compute())))
}
