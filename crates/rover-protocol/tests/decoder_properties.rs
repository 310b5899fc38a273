//! 分帧与解析的属性测试
//!
//! 验证：
//! 1. 任意噪声穿插的合法字节流，每个合法数据包恰好产生一帧
//! 2. 非法分辨率总是被拒绝，且解码器回到 WaitStart1
//! 3. 线性单位编码再解码，每个样本精确等于 byte × k

use proptest::prelude::*;
use rover_protocol::{
    DecoderState, END, FrameDecoder, FrameHeader, MAX_SIZE, ProtocolError, Progress,
    SensorFrame, UnitLaw, encode_packet, parse_frame,
};

/// 不会被误认为结束字节的数据字节
fn data_byte() -> impl Strategy<Value = u8> {
    any::<u8>().prop_filter("END byte", |b| *b != END)
}

/// 不会被误认为起始字节的噪声字节
fn noise_byte() -> impl Strategy<Value = u8> {
    1u8..=255
}

/// (rows, cols, payload)
fn packet_parts() -> impl Strategy<Value = (u8, u8, Vec<u8>)> {
    (1u8..=12, 1u8..=12).prop_flat_map(|(rows, cols)| {
        let n = rows as usize * cols as usize;
        (Just(rows), Just(cols), prop::collection::vec(data_byte(), n))
    })
}

fn decode_all(decoder: &mut FrameDecoder, bytes: &[u8], unit: UnitLaw) -> Vec<SensorFrame> {
    let mut frames = Vec::new();
    for &b in bytes {
        if decoder.push(b) == Progress::Complete
            && let Ok(frame) = parse_frame(decoder.packet(), unit, MAX_SIZE)
        {
            frames.push(frame);
        }
    }
    frames
}

proptest! {
    #[test]
    fn prop_one_frame_per_packet_with_noise(
        packets in prop::collection::vec(packet_parts(), 1..6),
        noise in prop::collection::vec(prop::collection::vec(noise_byte(), 0..16), 7),
        trailer in (data_byte(), data_byte()),
        unit in 1u16..=20,
    ) {
        let law = UnitLaw::Linear { unit };
        let mut stream = Vec::new();
        for (i, (rows, cols, payload)) in packets.iter().enumerate() {
            stream.extend_from_slice(&noise[i]);
            let header = FrameHeader::with_resolution(*rows, *cols);
            stream.extend(encode_packet(&header, payload, [trailer.0, trailer.1]));
        }
        stream.extend_from_slice(&noise[6]);

        let mut decoder = FrameDecoder::new();
        let frames = decode_all(&mut decoder, &stream, law);

        prop_assert_eq!(frames.len(), packets.len());
        for (frame, (rows, cols, payload)) in frames.iter().zip(&packets) {
            prop_assert_eq!(frame.rows(), *rows as usize);
            prop_assert_eq!(frame.cols(), *cols as usize);
            for (sample, byte) in frame.samples().iter().zip(payload) {
                prop_assert_eq!(*sample, law.to_millimeters(*byte));
            }
        }
    }

    #[test]
    fn prop_invalid_resolution_rejected(
        rows in prop_oneof![Just(0u8), 101u8..=220, 222u8..=255, 1u8..=100],
        cols in prop_oneof![Just(0u8), 101u8..=220, 222u8..=255],
        payload in prop::collection::vec(data_byte(), 0..64),
        swap in any::<bool>(),
    ) {
        let (rows, cols) = if swap { (cols, rows) } else { (rows, cols) };
        let packet = encode_packet(&FrameHeader::with_resolution(rows, cols), &payload, [0, 0]);

        let mut decoder = FrameDecoder::new();
        let mut completed = 0;
        for &b in &packet {
            if decoder.push(b) == Progress::Complete {
                completed += 1;
                let is_invalid_resolution = matches!(
                    parse_frame(decoder.packet(), UnitLaw::default(), MAX_SIZE),
                    Err(ProtocolError::InvalidResolution { .. })
                );
                prop_assert!(is_invalid_resolution);
            }
        }
        prop_assert_eq!(completed, 1);
        prop_assert_eq!(decoder.state(), DecoderState::WaitStart1);
    }

    #[test]
    fn prop_linear_roundtrip_exact(
        (rows, cols, payload) in packet_parts(),
        k in 1u16..=1000,
    ) {
        let packet = encode_packet(&FrameHeader::with_resolution(rows, cols), &payload, [0, 0]);
        let frame = parse_frame(&packet, UnitLaw::Linear { unit: k }, MAX_SIZE).unwrap();
        for (sample, byte) in frame.samples().iter().zip(&payload) {
            prop_assert_eq!(*sample, f32::from(*byte) * f32::from(k));
        }
    }
}

#[test]
fn test_two_by_two_scenario() {
    let mut stream = vec![0x00, 0xFF];
    stream.extend_from_slice(&FrameHeader::with_resolution(2, 2).to_bytes()[2..]);
    stream.extend_from_slice(&[0x05, 0x0A, 0x0F, 0x14, 0x33, 0x44, 0xDD]);

    let mut decoder = FrameDecoder::new();
    let frames = decode_all(&mut decoder, &stream, UnitLaw::Linear { unit: 10 });

    assert_eq!(frames.len(), 1);
    let grid: Vec<Vec<f32>> = frames[0].iter_rows().map(|r| r.to_vec()).collect();
    assert_eq!(grid, vec![vec![50.0, 100.0], vec![150.0, 200.0]]);
}
