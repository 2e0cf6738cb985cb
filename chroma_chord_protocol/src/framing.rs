// Length-delimited JSON framing over TCP.
//
// One frame = a 4-byte big-endian payload length followed by that many bytes
// of JSON. The typed `write_frame`/`read_frame` pair is what the generator
// and controllers actually use; the `_raw` variants move unparsed bytes for
// callers that need them (the test harness sends deliberately broken
// payloads through `write_raw_frame`).
//
// `MAX_FRAME_LEN` bounds the allocation a length prefix can demand. The
// largest real message is the histogram broadcast at a few hundred bytes, so
// 32 KB is generous without letting a bad prefix ask for gigabytes.

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Upper bound on a frame's payload length, in bytes.
pub const MAX_FRAME_LEN: u32 = 32 * 1024;

/// Serialize `msg` to JSON and write it as one frame, flushing the writer.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> io::Result<()> {
    let payload = serde_json::to_vec(msg).map_err(io::Error::other)?;
    write_raw_frame(writer, &payload)
}

/// Write an already-encoded payload as one frame, flushing the writer.
pub fn write_raw_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let Ok(len) = u32::try_from(payload.len()) else {
        return Err(oversize_error(payload.len()));
    };
    if len > MAX_FRAME_LEN {
        return Err(oversize_error(payload.len()));
    }
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Read one frame and deserialize its JSON payload. A payload that is not
/// valid JSON for `T` comes back as `InvalidData`; a stream that closes
/// mid-frame comes back as `UnexpectedEof`.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> io::Result<T> {
    let payload = read_raw_frame(reader)?;
    serde_json::from_slice(&payload)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

/// Read one frame's payload without decoding it.
pub fn read_raw_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix)?;
    let len = u32::from_be_bytes(prefix);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds the {MAX_FRAME_LEN} byte cap"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

fn oversize_error(len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("frame payload of {len} bytes exceeds the {MAX_FRAME_LEN} byte cap"),
    )
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn raw_frames_travel_in_order() {
        let mut wire = Vec::new();
        for payload in [b"first".as_slice(), b"", b"third"] {
            write_raw_frame(&mut wire, payload).unwrap();
        }
        let mut cursor = Cursor::new(&wire);
        assert_eq!(read_raw_frame(&mut cursor).unwrap(), b"first");
        assert_eq!(read_raw_frame(&mut cursor).unwrap(), b"");
        assert_eq!(read_raw_frame(&mut cursor).unwrap(), b"third");
    }

    #[test]
    fn typed_frame_roundtrip() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &vec![1u32, 2, 3]).unwrap();
        let mut cursor = Cursor::new(&wire);
        let back: Vec<u32> = read_frame(&mut cursor).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[test]
    fn oversized_write_is_refused() {
        let big = vec![0u8; MAX_FRAME_LEN as usize + 1];
        let err = write_raw_frame(&mut Vec::new(), &big).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn oversized_length_prefix_is_refused() {
        let prefix = (MAX_FRAME_LEN + 1).to_be_bytes();
        let mut cursor = Cursor::new(prefix.to_vec());
        let err = read_raw_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_prefix_reads_as_eof() {
        let mut cursor = Cursor::new(vec![0u8, 1]);
        let err = read_raw_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn truncated_payload_reads_as_eof() {
        let mut wire = Vec::new();
        write_raw_frame(&mut wire, b"payload").unwrap();
        wire.truncate(wire.len() - 2);
        let mut cursor = Cursor::new(&wire);
        let err = read_raw_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn undecodable_payload_reads_as_invalid_data() {
        let mut wire = Vec::new();
        write_raw_frame(&mut wire, b"not json").unwrap();
        let mut cursor = Cursor::new(&wire);
        let err = read_frame::<_, Vec<u32>>(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
