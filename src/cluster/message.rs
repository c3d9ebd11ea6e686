use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use crate::core::error::{Error, Result};
use crate::core::types::{Entity, FieldDescriptor, FieldValue};

// Frame layout
// [ LENGTH (u32 BE) ][ TAG (u8) ][ PAYLOAD ]
// LENGTH counts the tag and the payload.
pub const FRAME_HEADER: usize = 4;

const TAG_INSERT: u8 = 1;
const TAG_UPDATE: u8 = 2;
const TAG_REMOVE: u8 = 3;
const TAG_REF_BY: u8 = 4;

const VALUE_TEXT: u8 = 1;
const VALUE_NUMBER: u8 = 2;
const VALUE_DATE: u8 = 3;
const VALUE_BOOL: u8 = 4;

const FLAG_INDEXED: u8 = 0b001;
const FLAG_STORED: u8 = 0b010;
const FLAG_TOKENIZED: u8 = 0b100;

/// A change notification exchanged between nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterMessage {
    Insert(Entity),
    Update(Entity),
    Remove { entity_type: String, id: String },
    RefByInvalidate { entity_type: String, id: String },
}

impl ClusterMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterMessage::Insert(_) => "insert",
            ClusterMessage::Update(_) => "update",
            ClusterMessage::Remove { .. } => "remove",
            ClusterMessage::RefByInvalidate { .. } => "ref_by_invalidate",
        }
    }

    pub fn entity_type(&self) -> &str {
        match self {
            ClusterMessage::Insert(entity) | ClusterMessage::Update(entity) => &entity.entity_type,
            ClusterMessage::Remove { entity_type, .. } | ClusterMessage::RefByInvalidate { entity_type, .. } => entity_type,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ClusterMessage::Insert(entity) | ClusterMessage::Update(entity) => &entity.id,
            ClusterMessage::Remove { id, .. } | ClusterMessage::RefByInvalidate { id, .. } => id,
        }
    }

    /// Full frame including the length prefix.
    pub fn encode(&self) -> Result<Bytes> {
        let mut body = BytesMut::new();
        match self {
            ClusterMessage::Insert(entity) => {
                body.put_u8(TAG_INSERT);
                put_entity(&mut body, entity)?;
            }
            ClusterMessage::Update(entity) => {
                body.put_u8(TAG_UPDATE);
                put_entity(&mut body, entity)?;
            }
            ClusterMessage::Remove { entity_type, id } => {
                body.put_u8(TAG_REMOVE);
                put_string(&mut body, entity_type)?;
                put_string(&mut body, id)?;
            }
            ClusterMessage::RefByInvalidate { entity_type, id } => {
                body.put_u8(TAG_REF_BY);
                put_string(&mut body, entity_type)?;
                put_string(&mut body, id)?;
            }
        }

        let length = u32::try_from(body.len())
            .map_err(|_| Error::protocol(format!("message of {} bytes is too large to frame", body.len())))?;
        let mut frame = BytesMut::with_capacity(FRAME_HEADER + body.len());
        frame.put_u32(length);
        frame.extend_from_slice(&body);
        Ok(frame.freeze())
    }

    /// Decodes the tag and payload of one frame. Trailing bytes are an error.
    pub fn decode_body(body: &[u8]) -> Result<Self> {
        let mut reader = Reader { buf: body };
        let message = match reader.u8()? {
            TAG_INSERT => ClusterMessage::Insert(reader.entity()?),
            TAG_UPDATE => ClusterMessage::Update(reader.entity()?),
            TAG_REMOVE => ClusterMessage::Remove {
                entity_type: reader.string()?,
                id: reader.string()?,
            },
            TAG_REF_BY => ClusterMessage::RefByInvalidate {
                entity_type: reader.string()?,
                id: reader.string()?,
            },
            tag => return Err(Error::protocol(format!("unknown message tag {}", tag))),
        };

        if reader.buf.has_remaining() {
            return Err(Error::protocol(format!("{} trailing bytes after message", reader.buf.remaining())));
        }
        Ok(message)
    }
}

/// Decodes one frame from the front of `buf`.
///
/// `Ok(None)` means more bytes are needed. A frame whose declared size
/// exceeds `max_message_size` is rejected before its body arrives.
pub fn decode_frame(buf: &[u8], max_message_size: usize) -> Result<Option<(ClusterMessage, usize)>> {
    if buf.len() > max_message_size {
        return Err(Error::protocol(format!("message exceeds {} bytes", max_message_size)));
    }
    if buf.len() < FRAME_HEADER {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if length == 0 {
        return Err(Error::protocol("empty frame"));
    }
    let total = FRAME_HEADER + length;
    if total > max_message_size {
        return Err(Error::protocol(format!("declared message size {} exceeds {} bytes", total, max_message_size)));
    }
    if buf.len() < total {
        return Ok(None);
    }

    let message = ClusterMessage::decode_body(&buf[FRAME_HEADER..total])?;
    Ok(Some((message, total)))
}

fn put_string(buf: &mut BytesMut, value: &str) -> Result<()> {
    let len = u32::try_from(value.len())
        .map_err(|_| Error::protocol("string too long to encode"))?;
    buf.put_u32(len);
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

fn put_entity(buf: &mut BytesMut, entity: &Entity) -> Result<()> {
    put_string(buf, &entity.entity_type)?;
    put_string(buf, &entity.id)?;

    let count = u16::try_from(entity.fields.len())
        .map_err(|_| Error::protocol(format!("entity {} has too many fields", entity.id)))?;
    buf.put_u16(count);
    for field in &entity.fields {
        put_string(buf, &field.name)?;
        let mut flags = 0;
        if field.indexed {
            flags |= FLAG_INDEXED;
        }
        if field.stored {
            flags |= FLAG_STORED;
        }
        if field.tokenized {
            flags |= FLAG_TOKENIZED;
        }
        buf.put_u8(flags);

        match &field.value {
            FieldValue::Text(text) => {
                buf.put_u8(VALUE_TEXT);
                put_string(buf, text)?;
            }
            FieldValue::Number(n) => {
                buf.put_u8(VALUE_NUMBER);
                buf.put_f64(*n);
            }
            FieldValue::Date(date) => {
                buf.put_u8(VALUE_DATE);
                buf.put_i64(date.timestamp_millis());
            }
            FieldValue::Boolean(b) => {
                buf.put_u8(VALUE_BOOL);
                buf.put_u8(u8::from(*b));
            }
        }
    }
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(Error::protocol(format!("truncated message: need {} bytes, have {}", n, self.buf.remaining())));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        self.need(len)?;
        let (head, rest) = self.buf.split_at(len);
        self.buf = rest;
        String::from_utf8(head.to_vec()).map_err(|_| Error::protocol("string is not valid UTF-8"))
    }

    fn value(&mut self) -> Result<FieldValue> {
        match self.u8()? {
            VALUE_TEXT => Ok(FieldValue::Text(self.string()?)),
            VALUE_NUMBER => {
                self.need(8)?;
                Ok(FieldValue::Number(self.buf.get_f64()))
            }
            VALUE_DATE => {
                self.need(8)?;
                let millis = self.buf.get_i64();
                DateTime::<Utc>::from_timestamp_millis(millis)
                    .map(FieldValue::Date)
                    .ok_or_else(|| Error::protocol(format!("date {} out of range", millis)))
            }
            VALUE_BOOL => match self.u8()? {
                0 => Ok(FieldValue::Boolean(false)),
                1 => Ok(FieldValue::Boolean(true)),
                other => Err(Error::protocol(format!("invalid boolean byte {}", other))),
            },
            tag => Err(Error::protocol(format!("unknown value tag {}", tag))),
        }
    }

    fn entity(&mut self) -> Result<Entity> {
        let entity_type = self.string()?;
        let id = self.string()?;
        let count = self.u16()? as usize;

        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.string()?;
            let flags = self.u8()?;
            let value = self.value()?;
            fields.push(FieldDescriptor {
                name,
                value,
                indexed: flags & FLAG_INDEXED != 0,
                stored: flags & FLAG_STORED != 0,
                tokenized: flags & FLAG_TOKENIZED != 0,
            });
        }
        Ok(Entity { entity_type, id, fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::core::error::ErrorKind;

    fn article() -> Entity {
        Entity::new("Article", "42")
            .with_field(FieldDescriptor::text("title", "Chunked storage"))
            .with_field(FieldDescriptor::keyword("views", 12.5))
            .with_field(FieldDescriptor::stored("published", Utc.timestamp_millis_opt(1_700_000_000_123).unwrap()))
            .with_field(FieldDescriptor::keyword("draft", false).unstored())
    }

    #[test]
    fn insert_frame_layout() {
        let frame = ClusterMessage::Insert(Entity::new("A", "1")).encode().unwrap();
        // tag + two 1-byte strings with u32 lengths + u16 field count
        let expected_len = 1 + (4 + 1) + (4 + 1) + 2;
        assert_eq!(&frame[..4], &(expected_len as u32).to_be_bytes());
        assert_eq!(frame[4], TAG_INSERT);
        assert_eq!(frame.len(), FRAME_HEADER + expected_len);
    }

    #[test]
    fn entity_survives_the_wire() {
        let message = ClusterMessage::Update(article());
        let frame = message.encode().unwrap();
        let (decoded, used) = decode_frame(&frame, 1024).unwrap().unwrap();
        assert_eq!(used, frame.len());
        assert_eq!(decoded, message);
    }

    #[test]
    fn partial_frame_needs_more() {
        let frame = ClusterMessage::Remove { entity_type: "Article".into(), id: "1".into() }.encode().unwrap();
        assert!(decode_frame(&frame[..3], 1024).unwrap().is_none());
        assert!(decode_frame(&frame[..frame.len() - 1], 1024).unwrap().is_none());
    }

    #[test]
    fn oversized_declaration_is_rejected_early() {
        let mut header = Vec::new();
        header.extend_from_slice(&(10_000u32).to_be_bytes());
        header.push(TAG_INSERT);
        let err = decode_frame(&header, 1024).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProtocolViolation);
    }

    #[test]
    fn malformed_bodies_are_protocol_violations() {
        let mut trailing = ClusterMessage::RefByInvalidate { entity_type: "A".into(), id: "1".into() }
            .encode().unwrap().to_vec();
        trailing.push(0);
        let length = (trailing.len() - FRAME_HEADER) as u32;
        trailing[..4].copy_from_slice(&length.to_be_bytes());
        assert_eq!(decode_frame(&trailing, 1024).unwrap_err().kind, ErrorKind::ProtocolViolation);

        assert_eq!(ClusterMessage::decode_body(&[9]).unwrap_err().kind, ErrorKind::ProtocolViolation);
        assert_eq!(ClusterMessage::decode_body(&[TAG_REMOVE, 0, 0, 0, 5, b'a']).unwrap_err().kind, ErrorKind::ProtocolViolation);
        assert_eq!(decode_frame(&[0, 0, 0, 0], 1024).unwrap_err().kind, ErrorKind::ProtocolViolation);
    }
}
