//! `multipart/x-mixed-replace` framing

use tokio::io::{AsyncWrite, AsyncWriteExt};

pub const BOUNDARY: &str = "frame";

pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

pub const PART_CONTENT_TYPE: &str = "image/jpeg";

/// Headers of the streaming response, besides its content type
pub const NO_CACHE_HEADERS: [(&str, &str); 3] = [
    ("cache-control", "no-cache, no-store, must-revalidate"),
    ("pragma", "no-cache"),
    ("expires", "0"),
];

/// Boundary line and part headers up to and including the blank line
pub fn part_header(len: usize) -> String {
    format!("--{BOUNDARY}\r\nContent-Type: {PART_CONTENT_TYPE}\r\nContent-Length: {len}\r\n\r\n")
}

/// Write one complete part and flush it through
pub async fn write_part<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(part_header(payload.len()).as_bytes()).await?;
    writer.write_all(payload).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await
}

/// Read one part and return its payload, checking the framing
#[cfg(test)]
pub(crate) async fn read_part<R>(reader: &mut R) -> Vec<u8>
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        head.push(reader.read_u8().await.unwrap());
    }
    let head = String::from_utf8(head).unwrap();
    let len: usize = head
        .lines()
        .find_map(|l| l.strip_prefix("Content-Length: "))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_eq!(head, part_header(len));

    let mut payload = vec![0; len];
    reader.read_exact(&mut payload).await.unwrap();
    let mut crlf = [0; 2];
    reader.read_exact(&mut crlf).await.unwrap();
    assert_eq!(&crlf, b"\r\n");
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_carries_exact_length() {
        assert_eq!(
            part_header(1234),
            "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 1234\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn part_is_terminated_by_crlf() {
        let mut out = Vec::new();
        write_part(&mut out, b"\xff\xd8abc\xff\xd9").await.unwrap();

        let header = part_header(7);
        assert!(out.starts_with(header.as_bytes()));
        assert_eq!(&out[header.len()..], b"\xff\xd8abc\xff\xd9\r\n");
    }
}
