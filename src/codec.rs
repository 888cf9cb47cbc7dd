use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ProtocolError, Result};
use crate::value::{HostObjectRef, ScriptObjectRef, Value, ValueType};

/// Maps script object ids read off the wire to proxies.
pub trait ObjectResolver: Send + Sync {
    fn script_object(&self, ref_id: i32) -> ScriptObjectRef;
}

/// Resolver producing proxies that nothing tracks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Untracked;

impl ObjectResolver for Untracked {
    fn script_object(&self, ref_id: i32) -> ScriptObjectRef {
        ScriptObjectRef::untracked(ref_id)
    }
}

/// Write a length-prefixed UTF-8 string without a type tag.
pub fn write_untagged_string(buf: &mut BytesMut, data: &str) {
    buf.put_i32(data.len() as i32);
    buf.put_slice(data.as_bytes());
}

/// Write a type tag followed by the value's payload.
pub fn write_value(buf: &mut BytesMut, value: &Value) {
    buf.put_u8(value.value_type().to_u8());
    match value {
        Value::Null | Value::Undefined => {}
        Value::Boolean(v) => buf.put_u8(*v as u8),
        Value::Byte(v) => buf.put_i8(*v),
        Value::Char(v) => buf.put_u16(*v),
        Value::Short(v) => buf.put_i16(*v),
        Value::Int(v) => buf.put_i32(*v),
        Value::Long(v) => buf.put_i64(*v),
        Value::Float(v) => buf.put_f32(*v),
        Value::Double(v) => buf.put_f64(*v),
        Value::String(v) => write_untagged_string(buf, v),
        Value::HostObject(v) => buf.put_i32(v.ref_id()),
        Value::ScriptObject(v) => buf.put_i32(v.ref_id()),
    }
}

/// Read a non-negative 32-bit length and check it against `max`.
pub async fn read_length<R>(reader: &mut R, max: usize) -> Result<usize>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let len = reader.read_i32().await?;
    if len < 0 || len as usize > max {
        return Err(ProtocolError::LengthOutOfRange {
            length: len as i64,
            max,
        }
        .into());
    }
    Ok(len as usize)
}

pub async fn read_untagged_string<R>(reader: &mut R, max: usize) -> Result<String>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let len = read_length(reader, max).await?;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    String::from_utf8(data).map_err(|_| ProtocolError::InvalidUtf8.into())
}

pub async fn read_value_type<R>(reader: &mut R) -> Result<ValueType>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let tag = reader.read_u8().await?;
    Ok(ValueType::from_u8(tag)?)
}

/// Object ids on the wire are never negative.
async fn read_object_id<R>(reader: &mut R) -> Result<i32>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let ref_id = reader.read_i32().await?;
    if ref_id < 0 {
        return Err(ProtocolError::InvalidObjectId(ref_id).into());
    }
    Ok(ref_id)
}

/// Read one tagged value. Script object ids are turned into proxies by `resolver`.
pub async fn read_value<R>(
    reader: &mut R,
    resolver: &dyn ObjectResolver,
    max_len: usize,
) -> Result<Value>
where
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let value = match read_value_type(reader).await? {
        ValueType::Null => Value::Null,
        ValueType::Undefined => Value::Undefined,
        ValueType::Boolean => Value::Boolean(reader.read_u8().await? != 0),
        ValueType::Byte => Value::Byte(reader.read_i8().await?),
        ValueType::Char => Value::Char(reader.read_u16().await?),
        ValueType::Short => Value::Short(reader.read_i16().await?),
        ValueType::Int => Value::Int(reader.read_i32().await?),
        ValueType::Long => Value::Long(reader.read_i64().await?),
        ValueType::Float => Value::Float(reader.read_f32().await?),
        ValueType::Double => Value::Double(reader.read_f64().await?),
        ValueType::String => Value::String(read_untagged_string(reader, max_len).await?),
        ValueType::HostObject => {
            Value::HostObject(HostObjectRef::new(read_object_id(reader).await?))
        }
        ValueType::ScriptObject => {
            Value::ScriptObject(resolver.script_object(read_object_id(reader).await?))
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;

    const MAX: usize = 1024;

    async fn round_trip(value: Value) -> Value {
        let mut buf = BytesMut::new();
        write_value(&mut buf, &value);
        let mut reader = &buf[..];
        let decoded = read_value(&mut reader, &Untracked, MAX).await.unwrap();
        assert!(reader.is_empty(), "trailing bytes after {:?}", value);
        decoded
    }

    #[tokio::test]
    async fn test_round_trip_boundaries() {
        let values = vec![
            Value::Null,
            Value::Undefined,
            Value::Boolean(true),
            Value::Byte(i8::MIN),
            Value::Char(0xFFFF),
            Value::Short(i16::MAX),
            Value::Int(i32::MIN),
            Value::Int(i32::MAX),
            Value::Long(i64::MIN),
            Value::Float(-0.5),
            Value::Double(f64::MAX),
            Value::String(String::new()),
            Value::String("héllo wörld ✓ 𝄞".to_string()),
            Value::HostObject(HostObjectRef::new(12)),
        ];
        for value in values {
            assert_eq!(round_trip(value.clone()).await, value);
        }

        let proxy = round_trip(Value::ScriptObject(ScriptObjectRef::untracked(33))).await;
        assert_eq!(proxy.as_script_object().unwrap().ref_id(), 33);
    }

    #[test]
    fn test_big_endian_layout() {
        let mut buf = BytesMut::new();
        write_value(&mut buf, &Value::Int(0x0102_0304));
        assert_eq!(&buf[..], &[5, 1, 2, 3, 4]);

        let mut buf = BytesMut::new();
        write_value(&mut buf, &Value::from("é"));
        assert_eq!(&buf[..], &[9, 0, 0, 0, 2, 0xC3, 0xA9]);

        let mut buf = BytesMut::new();
        write_value(&mut buf, &Value::Char(0x00E9));
        assert_eq!(&buf[..], &[3, 0x00, 0xE9]);
    }

    #[test]
    fn test_exception_sign_not_written() {
        let mut buf = BytesMut::new();
        write_value(&mut buf, &Value::HostObject(HostObjectRef::exception(4)));
        assert_eq!(&buf[..], &[10, 0, 0, 0, 4]);
    }

    #[tokio::test]
    async fn test_invalid_value_type() {
        let mut reader: &[u8] = &[13];
        let err = read_value(&mut reader, &Untracked, MAX).await.unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Protocol(ProtocolError::InvalidValueType(13))
        ));
    }

    #[tokio::test]
    async fn test_string_length_checks() {
        let mut reader: &[u8] = &[9, 0xFF, 0xFF, 0xFF, 0xFF];
        let err = read_value(&mut reader, &Untracked, MAX).await.unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Protocol(ProtocolError::LengthOutOfRange { length: -1, .. })
        ));

        let mut reader: &[u8] = &[9, 0, 0, 0, 2, 0xC3, 0x28];
        let err = read_value(&mut reader, &Untracked, MAX).await.unwrap_err();
        assert!(matches!(err, ChannelError::Protocol(ProtocolError::InvalidUtf8)));
    }

    #[tokio::test]
    async fn test_negative_object_ids_rejected() {
        let table = crate::handles::HandleTable::new();

        let mut reader: &[u8] = &[11, 0x80, 0, 0, 0];
        let err = read_value(&mut reader, &table, MAX).await.unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Protocol(ProtocolError::InvalidObjectId(i32::MIN))
        ));
        assert!(err.is_fatal());

        let mut reader: &[u8] = &[10, 0xFF, 0xFF, 0xFF, 0xFD];
        let err = read_value(&mut reader, &table, MAX).await.unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Protocol(ProtocolError::InvalidObjectId(-3))
        ));

        let mut reader: &[u8] = &[11, 0xFF, 0xFF, 0xFF, 0xF9];
        assert!(read_value(&mut reader, &table, MAX).await.is_err());
        assert_eq!(table.live_count(), 0);
    }

    #[tokio::test]
    async fn test_truncated_payload_is_transport_error() {
        let mut reader: &[u8] = &[5, 0, 0];
        let err = read_value(&mut reader, &Untracked, MAX).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)));
    }
}
