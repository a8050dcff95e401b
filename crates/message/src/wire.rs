//! The symmetric binary serialisation of the message model, used by wire
//! protocols: type tag, name, source, destination list, property tree, and
//! the variant fields of §messages, in a fixed big-endian layout. A decode
//! of an encode reproduces every field exactly; opaque pointer properties
//! are refused rather than silently dropped.

use crate::cmd::{CmdHeader, CmdResultBody, StartGraphBody, TimerBody};
use crate::frame::{AudioFrameBody, AudioFrameDataFmt, DataBody, PixelFmt, VideoFrameBody};
use crate::{Body, Buf, Error, ErrorCode, Location, Message, MsgType, Result, StatusCode};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Write;
use uuid::Uuid;

impl MsgType {
    fn to_wire(self) -> u8 {
        match self {
            MsgType::Cmd => 1,
            MsgType::CmdResult => 2,
            MsgType::Data => 3,
            MsgType::AudioFrame => 4,
            MsgType::VideoFrame => 5,
            MsgType::StartGraph => 6,
            MsgType::StopGraph => 7,
            MsgType::CloseApp => 8,
            MsgType::Timer => 9,
            MsgType::Timeout => 10,
        }
    }

    fn from_wire(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => MsgType::Cmd,
            2 => MsgType::CmdResult,
            3 => MsgType::Data,
            4 => MsgType::AudioFrame,
            5 => MsgType::VideoFrame,
            6 => MsgType::StartGraph,
            7 => MsgType::StopGraph,
            8 => MsgType::CloseApp,
            9 => MsgType::Timer,
            10 => MsgType::Timeout,
            _ => return Err(Error::InvalidWire("unknown message type tag")),
        })
    }
}

/// Encode `message` into a fresh buffer.
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let mut w = Vec::new();

    w.write_u8(message.msg_type().to_wire())?;
    write_str(&message.name, &mut w)?;
    write_loc(&message.src, &mut w)?;

    w.write_u32::<BigEndian>(message.dests.len() as u32)?;
    for dest in &message.dests {
        write_loc(dest, &mut w)?;
    }
    value::wire::encode(&message.properties, &mut w)?;

    match &message.body {
        Body::Cmd(header) => write_header(header, &mut w)?,
        Body::CmdResult(result) => {
            write_header(&result.header, &mut w)?;
            w.write_u8(result.status_code as u8)?;
            w.write_u8(result.error_code.map_or(0, |code| code as u8))?;
            w.write_u8(result.is_final as u8)?;
            value::wire::encode(&result.detail, &mut w)?;
            w.write_u8(result.original_cmd_type.to_wire())?;
            write_str(&result.original_cmd_name, &mut w)?;
        }
        Body::Data(data) => write_buf(&data.buf, &mut w)?,
        Body::AudioFrame(frame) => {
            w.write_i32::<BigEndian>(frame.sample_rate)?;
            w.write_i32::<BigEndian>(frame.bytes_per_sample)?;
            w.write_i32::<BigEndian>(frame.samples_per_channel)?;
            w.write_i32::<BigEndian>(frame.number_of_channels)?;
            w.write_u64::<BigEndian>(frame.channel_layout)?;
            w.write_u8(match frame.data_fmt {
                AudioFrameDataFmt::Interleave => 0,
                AudioFrameDataFmt::NonInterleave => 1,
            })?;
            w.write_i32::<BigEndian>(frame.line_size)?;
            w.write_i64::<BigEndian>(frame.timestamp)?;
            w.write_u8(frame.is_eof as u8)?;
            write_buf(&frame.buf, &mut w)?;
        }
        Body::VideoFrame(frame) => {
            w.write_u8(pixel_fmt_to_wire(frame.pixel_fmt))?;
            w.write_i32::<BigEndian>(frame.width)?;
            w.write_i32::<BigEndian>(frame.height)?;
            w.write_i64::<BigEndian>(frame.timestamp)?;
            w.write_u8(frame.is_eof as u8)?;
            write_buf(&frame.buf, &mut w)?;
        }
        Body::StartGraph(header, body) => {
            write_header(header, &mut w)?;
            write_str(&body.graph_json, &mut w)?;
            write_str(&body.predefined_graph_name, &mut w)?;
            w.write_u8(body.long_running_mode as u8)?;
        }
        Body::StopGraph(header, graph_id) => {
            write_header(header, &mut w)?;
            write_str(graph_id, &mut w)?;
        }
        Body::CloseApp(header) => write_header(header, &mut w)?,
        Body::Timer(header, timer) => {
            write_header(header, &mut w)?;
            w.write_u64::<BigEndian>(timer.timer_id)?;
            w.write_u64::<BigEndian>(timer.timeout_us)?;
            w.write_i64::<BigEndian>(timer.times)?;
        }
        Body::Timeout(header, timer_id) => {
            write_header(header, &mut w)?;
            w.write_u64::<BigEndian>(*timer_id)?;
        }
    }
    Ok(w)
}

/// Decode a Message which must occupy the entire buffer.
pub fn decode(buf: &[u8]) -> Result<Message> {
    let mut r = buf;

    let msg_type = MsgType::from_wire(r.read_u8()?)?;
    let name = read_str(&mut r)?;
    let src = read_loc(&mut r)?;

    let dest_len = r.read_u32::<BigEndian>()?;
    let mut dests = Vec::with_capacity(dest_len.min(64) as usize);
    for _ in 0..dest_len {
        dests.push(read_loc(&mut r)?);
    }
    let properties = value::wire::decode(&mut r)?;

    let body = match msg_type {
        MsgType::Cmd => Body::Cmd(read_header(&mut r)?),
        MsgType::CmdResult => {
            let header = read_header(&mut r)?;
            let status_code = StatusCode::from_wire(r.read_u8()?)
                .ok_or(Error::InvalidWire("unknown status code"))?;
            let error_code = match r.read_u8()? {
                0 => None,
                tag => Some(
                    ErrorCode::from_wire(tag).ok_or(Error::InvalidWire("unknown error code"))?,
                ),
            };
            let is_final = read_bool(&mut r)?;
            let detail = value::wire::decode(&mut r)?;
            let original_cmd_type = MsgType::from_wire(r.read_u8()?)?;
            let original_cmd_name = read_str(&mut r)?;

            Body::CmdResult(CmdResultBody {
                header,
                status_code,
                error_code,
                is_final,
                detail,
                original_cmd_type,
                original_cmd_name,
            })
        }
        MsgType::Data => Body::Data(DataBody {
            buf: read_buf(&mut r)?,
        }),
        MsgType::AudioFrame => Body::AudioFrame(AudioFrameBody {
            sample_rate: r.read_i32::<BigEndian>()?,
            bytes_per_sample: r.read_i32::<BigEndian>()?,
            samples_per_channel: r.read_i32::<BigEndian>()?,
            number_of_channels: r.read_i32::<BigEndian>()?,
            channel_layout: r.read_u64::<BigEndian>()?,
            data_fmt: match r.read_u8()? {
                0 => AudioFrameDataFmt::Interleave,
                1 => AudioFrameDataFmt::NonInterleave,
                _ => return Err(Error::InvalidWire("unknown audio data format")),
            },
            line_size: r.read_i32::<BigEndian>()?,
            timestamp: r.read_i64::<BigEndian>()?,
            is_eof: read_bool(&mut r)?,
            buf: read_buf(&mut r)?,
        }),
        MsgType::VideoFrame => Body::VideoFrame(VideoFrameBody {
            pixel_fmt: pixel_fmt_from_wire(r.read_u8()?)?,
            width: r.read_i32::<BigEndian>()?,
            height: r.read_i32::<BigEndian>()?,
            timestamp: r.read_i64::<BigEndian>()?,
            is_eof: read_bool(&mut r)?,
            buf: read_buf(&mut r)?,
        }),
        MsgType::StartGraph => {
            let header = read_header(&mut r)?;
            Body::StartGraph(
                header,
                StartGraphBody {
                    graph_json: read_str(&mut r)?,
                    predefined_graph_name: read_str(&mut r)?,
                    long_running_mode: read_bool(&mut r)?,
                },
            )
        }
        MsgType::StopGraph => Body::StopGraph(read_header(&mut r)?, read_str(&mut r)?),
        MsgType::CloseApp => Body::CloseApp(read_header(&mut r)?),
        MsgType::Timer => {
            let header = read_header(&mut r)?;
            Body::Timer(
                header,
                TimerBody {
                    timer_id: r.read_u64::<BigEndian>()?,
                    timeout_us: r.read_u64::<BigEndian>()?,
                    times: r.read_i64::<BigEndian>()?,
                },
            )
        }
        MsgType::Timeout => {
            let header = read_header(&mut r)?;
            Body::Timeout(header, r.read_u64::<BigEndian>()?)
        }
    };

    if !r.is_empty() {
        return Err(Error::InvalidWire("trailing bytes after message"));
    }

    Ok(Message {
        name,
        src,
        dests,
        properties,
        body,
    })
}

fn pixel_fmt_to_wire(fmt: PixelFmt) -> u8 {
    match fmt {
        PixelFmt::Rgb24 => 1,
        PixelFmt::Rgba => 2,
        PixelFmt::Bgr24 => 3,
        PixelFmt::Bgra => 4,
        PixelFmt::I420 => 5,
        PixelFmt::I422 => 6,
        PixelFmt::Nv12 => 7,
        PixelFmt::Nv21 => 8,
    }
}

fn pixel_fmt_from_wire(tag: u8) -> Result<PixelFmt> {
    Ok(match tag {
        1 => PixelFmt::Rgb24,
        2 => PixelFmt::Rgba,
        3 => PixelFmt::Bgr24,
        4 => PixelFmt::Bgra,
        5 => PixelFmt::I420,
        6 => PixelFmt::I422,
        7 => PixelFmt::Nv12,
        8 => PixelFmt::Nv21,
        _ => return Err(Error::InvalidWire("unknown pixel format")),
    })
}

fn write_str<W: Write>(s: &str, w: &mut W) -> Result<()> {
    w.write_u32::<BigEndian>(s.len() as u32)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn read_str(r: &mut &[u8]) -> Result<String> {
    String::from_utf8(read_bytes(r)?).map_err(|_| Error::InvalidWire("non-UTF8 string"))
}

fn read_bytes(r: &mut &[u8]) -> Result<Vec<u8>> {
    let len = r.read_u32::<BigEndian>()? as usize;
    if len > r.len() {
        return Err(Error::InvalidWire("length prefix overruns input"));
    }
    let (body, rest) = r.split_at(len);
    let body = body.to_vec();
    *r = rest;
    Ok(body)
}

fn read_bool(r: &mut &[u8]) -> Result<bool> {
    match r.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(Error::InvalidWire("bool is neither 0 nor 1")),
    }
}

fn write_loc<W: Write>(loc: &Location, w: &mut W) -> Result<()> {
    write_str(&loc.app_uri, w)?;
    write_str(&loc.graph_id, w)?;
    write_str(&loc.extension_group, w)?;
    write_str(&loc.extension, w)
}

fn read_loc(r: &mut &[u8]) -> Result<Location> {
    Ok(Location {
        app_uri: read_str(r)?,
        graph_id: read_str(r)?,
        extension_group: read_str(r)?,
        extension: read_str(r)?,
    })
}

fn write_header<W: Write>(header: &CmdHeader, w: &mut W) -> Result<()> {
    w.write_all(header.cmd_id.as_bytes())?;
    write_str(&header.seq_id, w)
}

fn read_header(r: &mut &[u8]) -> Result<CmdHeader> {
    if r.len() < 16 {
        return Err(Error::InvalidWire("truncated cmd_id"));
    }
    let (id, rest) = r.split_at(16);
    let cmd_id = Uuid::from_slice(id).map_err(|_| Error::InvalidWire("malformed cmd_id"))?;
    *r = rest;

    Ok(CmdHeader {
        cmd_id,
        seq_id: read_str(r)?,
    })
}

fn write_buf<W: Write>(buf: &Buf, w: &mut W) -> Result<()> {
    w.write_u32::<BigEndian>(buf.len() as u32)?;
    w.write_all(buf.as_slice())?;
    Ok(())
}

fn read_buf(r: &mut &[u8]) -> Result<Buf> {
    Ok(Buf::from_vec(read_bytes(r)?))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use value::Value;

    #[test]
    fn test_cmd_round_trip() {
        let mut cmd = Message::cmd("hello").unwrap();
        cmd.set_src(Location::new("msgpack://a:1/", "g", "group", "client"));
        cmd.add_dest(Location::extension("group", "server"));
        cmd.set_property("a", Value::Int8(-3)).unwrap();
        cmd.set_property("b.c[0]", Value::from("x")).unwrap();

        let decoded = decode(&encode(&cmd).unwrap()).unwrap();

        assert_eq!(decoded.msg_type(), MsgType::Cmd);
        assert_eq!(decoded.name(), "hello");
        assert_eq!(decoded.src(), cmd.src());
        assert_eq!(decoded.dests(), cmd.dests());
        assert_eq!(decoded.cmd_id(), cmd.cmd_id());
        assert_eq!(decoded.properties(), cmd.properties());
    }

    #[test]
    fn test_cmd_result_round_trip() {
        let cmd = Message::cmd("hello").unwrap();
        let mut result = Message::cmd_result(StatusCode::Error, &cmd).unwrap();
        {
            let body = result.result_mut().unwrap();
            body.error_code = Some(ErrorCode::Timeout);
            body.is_final = false;
            body.detail = Value::from("took too long");
        }

        let decoded = decode(&encode(&result).unwrap()).unwrap();
        let body = decoded.result().unwrap();

        assert_eq!(decoded.cmd_id(), cmd.cmd_id());
        assert_eq!(body.status_code, StatusCode::Error);
        assert_eq!(body.error_code, Some(ErrorCode::Timeout));
        assert!(!body.is_final);
        assert_eq!(body.detail, Value::from("took too long"));
        assert_eq!(body.original_cmd_type, MsgType::Cmd);
        assert_eq!(body.original_cmd_name, "hello");
    }

    #[test]
    fn test_frame_round_trips() {
        let mut data = Message::data("pcm").unwrap();
        match data.body_mut() {
            Body::Data(body) => body.buf = Buf::from_vec(b"\x01\x02\x03".to_vec()),
            _ => unreachable!(),
        }
        let decoded = decode(&encode(&data).unwrap()).unwrap();
        match decoded.body() {
            Body::Data(body) => assert_eq!(body.buf.as_slice(), b"\x01\x02\x03"),
            _ => unreachable!(),
        }

        let mut frame = Message::audio_frame("mic").unwrap();
        match frame.body_mut() {
            Body::AudioFrame(body) => {
                body.sample_rate = 48_000;
                body.bytes_per_sample = 2;
                body.number_of_channels = 2;
                body.data_fmt = AudioFrameDataFmt::NonInterleave;
                body.timestamp = -1;
                body.is_eof = true;
                body.buf = Buf::from_vec(vec![0u8; 16]);
            }
            _ => unreachable!(),
        }
        let decoded = decode(&encode(&frame).unwrap()).unwrap();
        match decoded.body() {
            Body::AudioFrame(body) => {
                assert_eq!(body.sample_rate, 48_000);
                assert_eq!(body.data_fmt, AudioFrameDataFmt::NonInterleave);
                assert_eq!(body.timestamp, -1);
                assert!(body.is_eof);
                assert_eq!(body.buf.len(), 16);
            }
            _ => unreachable!(),
        }

        let mut frame = Message::video_frame("cam").unwrap();
        match frame.body_mut() {
            Body::VideoFrame(body) => {
                body.pixel_fmt = PixelFmt::I420;
                body.width = 640;
                body.height = 480;
            }
            _ => unreachable!(),
        }
        let decoded = decode(&encode(&frame).unwrap()).unwrap();
        match decoded.body() {
            Body::VideoFrame(body) => {
                assert_eq!(body.pixel_fmt, PixelFmt::I420);
                assert_eq!((body.width, body.height), (640, 480));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_builtin_round_trips() {
        let timer = Message::timer(TimerBody {
            timer_id: 7,
            timeout_us: 200_000,
            times: -1,
        });
        let decoded = decode(&encode(&timer).unwrap()).unwrap();
        match decoded.body() {
            Body::Timer(_, body) => {
                assert_eq!((body.timer_id, body.timeout_us, body.times), (7, 200_000, -1));
            }
            _ => unreachable!(),
        }

        let stop = Message::stop_graph("graph-1");
        let decoded = decode(&encode(&stop).unwrap()).unwrap();
        match decoded.body() {
            Body::StopGraph(_, graph_id) => assert_eq!(graph_id, "graph-1"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_opaque_pointer_is_refused() {
        let mut cmd = Message::cmd("hello").unwrap();
        cmd.set_property("p", Value::Ptr(value::Opaque::new(1u8)))
            .unwrap();
        assert!(matches!(
            encode(&cmd),
            Err(Error::Value(value::Error::UnserializableProperty))
        ));
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(decode(&[]).is_err());
        assert!(decode(&[0xff]).is_err());

        // Valid prefix, trailing garbage.
        let mut bytes = encode(&Message::close_app()).unwrap();
        bytes.push(0);
        assert!(decode(&bytes).is_err());
    }
}
