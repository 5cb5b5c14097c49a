//! The raw event format shared by files and sockets.
//!
//! ```text
//! repeat until EOF:
//!   tag   : u32
//!   l1id  : u16
//!   bcid  : u16
//!   nHits : u16
//!   hits[nHits] : col u16, row u16, tot u16
//! ```
//!
//! All fields are little endian. There is no framing; the record length is implied by nHits.
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use super::constants::{EVENT_HEADER_SIZE, HIT_SIZE, NHITS_SIZE};
use super::error::RawFormatError;
use super::event::{Event, Hit};

/// Read as many bytes as are available into buf, stopping early only at end of data.
///
/// Returns the number of bytes read. Unlike `read_exact`, a short read is not an error,
/// because a file may simply not have been fully written yet.
pub fn read_available<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read the fixed part of a record (tag, l1id, bcid).
///
/// Returns `Truncated` if fewer than [`EVENT_HEADER_SIZE`] bytes were available.
pub fn read_header<R: Read>(reader: &mut R) -> Result<Event, RawFormatError> {
    let mut buf = [0u8; EVENT_HEADER_SIZE];
    let found = read_available(reader, &mut buf)?;
    if found < EVENT_HEADER_SIZE {
        return Err(RawFormatError::Truncated {
            needed: EVENT_HEADER_SIZE,
            found,
        });
    }
    Ok(Event::new(
        LittleEndian::read_u32(&buf[0..4]),
        LittleEndian::read_u16(&buf[4..6]),
        LittleEndian::read_u16(&buf[6..8]),
    ))
}

/// Read nHits and the hit block of a record into an event whose header was already read.
///
/// On `Truncated` the event may hold some of the hits; callers are expected to throw it away.
pub fn read_hits<R: Read>(reader: &mut R, event: &mut Event) -> Result<(), RawFormatError> {
    let mut count_buf = [0u8; NHITS_SIZE];
    let found = read_available(reader, &mut count_buf)?;
    if found < NHITS_SIZE {
        return Err(RawFormatError::Truncated {
            needed: NHITS_SIZE,
            found,
        });
    }
    let n_hits = LittleEndian::read_u16(&count_buf) as usize;

    let mut hit_buf = vec![0u8; n_hits * HIT_SIZE];
    let found = read_available(reader, &mut hit_buf)?;
    if found < hit_buf.len() {
        return Err(RawFormatError::Truncated {
            needed: hit_buf.len(),
            found,
        });
    }
    for chunk in hit_buf.chunks_exact(HIT_SIZE) {
        event.add_hit(Hit::new(
            LittleEndian::read_u16(&chunk[0..2]),
            LittleEndian::read_u16(&chunk[2..4]),
            LittleEndian::read_u16(&chunk[4..6]),
        ))?;
    }
    Ok(())
}

/// Decode a complete buffer of back-to-back records, as delivered by a socket.
///
/// Any truncation is an error for the whole buffer.
pub fn decode_events(payload: &[u8]) -> Result<Vec<Event>, RawFormatError> {
    let mut cursor = Cursor::new(payload);
    let mut events = Vec::new();
    while (cursor.position() as usize) < payload.len() {
        let remaining = payload.len() - cursor.position() as usize;
        if remaining < EVENT_HEADER_SIZE + NHITS_SIZE {
            return Err(RawFormatError::Truncated {
                needed: EVENT_HEADER_SIZE + NHITS_SIZE,
                found: remaining,
            });
        }
        let tag = cursor.read_u32::<LittleEndian>()?;
        let l1id = cursor.read_u16::<LittleEndian>()?;
        let bcid = cursor.read_u16::<LittleEndian>()?;
        let n_hits = cursor.read_u16::<LittleEndian>()? as usize;

        let remaining = payload.len() - cursor.position() as usize;
        if remaining < n_hits * HIT_SIZE {
            return Err(RawFormatError::Truncated {
                needed: n_hits * HIT_SIZE,
                found: remaining,
            });
        }
        let mut event = Event::new(tag, l1id, bcid);
        for _ in 0..n_hits {
            let col = cursor.read_u16::<LittleEndian>()?;
            let row = cursor.read_u16::<LittleEndian>()?;
            let tot = cursor.read_u16::<LittleEndian>()?;
            event.add_hit(Hit::new(col, row, tot))?;
        }
        events.push(event);
    }
    Ok(events)
}

/// Write one event record
pub fn write_event<W: Write>(writer: &mut W, event: &Event) -> Result<(), RawFormatError> {
    writer.write_u32::<LittleEndian>(event.tag)?;
    writer.write_u16::<LittleEndian>(event.l1id)?;
    writer.write_u16::<LittleEndian>(event.bcid)?;
    writer.write_u16::<LittleEndian>(event.n_hits())?;
    for hit in event.hits() {
        writer.write_u16::<LittleEndian>(hit.col)?;
        writer.write_u16::<LittleEndian>(hit.row)?;
        writer.write_u16::<LittleEndian>(hit.tot)?;
    }
    Ok(())
}

/// Encode a sequence of events into a single buffer
pub fn encode_events(events: &[Event]) -> Result<Vec<u8>, RawFormatError> {
    let mut buffer = Vec::new();
    for event in events {
        write_event(&mut buffer, event)?;
    }
    Ok(buffer)
}

/// The encoded size of an event in bytes
pub fn encoded_size(event: &Event) -> usize {
    EVENT_HEADER_SIZE + NHITS_SIZE + event.hits().len() * HIT_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(n_hits: u16) -> Event {
        let hits = (0..n_hits).map(|i| Hit::new(i, i + 100, i * 2)).collect();
        Event::with_hits(0xDEADBEEF, 42, 17, hits).unwrap()
    }

    #[test]
    fn test_round_trip() {
        for n_hits in [0, 1, 5, 300] {
            let event = sample_event(n_hits);
            let mut buffer = Vec::new();
            write_event(&mut buffer, &event).unwrap();
            assert_eq!(buffer.len(), encoded_size(&event));

            let mut cursor = Cursor::new(&buffer);
            let mut decoded = read_header(&mut cursor).unwrap();
            read_hits(&mut cursor, &mut decoded).unwrap();
            assert_eq!(decoded, event);
        }
    }

    #[test]
    fn test_layout() {
        let event = Event::with_hits(1, 2, 3, vec![Hit::new(4, 5, 6)]).unwrap();
        let buffer = encode_events(&[event]).unwrap();
        assert_eq!(
            buffer,
            vec![1, 0, 0, 0, 2, 0, 3, 0, 1, 0, 4, 0, 5, 0, 6, 0]
        );
    }

    #[test]
    fn test_short_header() {
        let buffer = [1u8, 2, 3, 4, 5];
        match read_header(&mut Cursor::new(&buffer[..])) {
            Err(RawFormatError::Truncated { needed, found }) => {
                assert_eq!(needed, EVENT_HEADER_SIZE);
                assert_eq!(found, 5);
            }
            other => panic!("expected Truncated, got {other:?}"),
        }
    }

    #[test]
    fn test_short_hit_block() {
        let event = sample_event(3);
        let mut buffer = encode_events(&[event]).unwrap();
        buffer.truncate(buffer.len() - 2);
        let mut cursor = Cursor::new(&buffer);
        let mut decoded = read_header(&mut cursor).unwrap();
        assert!(matches!(
            read_hits(&mut cursor, &mut decoded),
            Err(RawFormatError::Truncated { .. })
        ));
    }

    #[test]
    fn test_decode_packet() {
        let events = vec![sample_event(2), sample_event(0), sample_event(4)];
        let payload = encode_events(&events).unwrap();
        assert_eq!(decode_events(&payload).unwrap(), events);
        assert!(decode_events(&[]).unwrap().is_empty());
        assert!(decode_events(&payload[..payload.len() - 1]).is_err());
    }
}
