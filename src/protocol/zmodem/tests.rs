#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::{Duration, Instant};

    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    use crate::com::test_util::CaptureSink;
    use crate::com::ConnectionEvent;
    use crate::protocol::zmodem::{
        build_subpacket, detect, parse_bin_header, parse_hex_header, parse_subpacket,
        rz::sanitize_file_name, zdle_decode, zdle_encode, FrameType, Header, Rz, Sz, ZCRCE, ZCRCG,
        ZCRCQ, ZCRCW,
    };

    fn drain(rx: &mut UnboundedReceiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn zrinit(flags: u8) -> Vec<u8> {
        Header::from_flags(FrameType::ZRInit, 0, 0, 0, flags).build_hex()
    }

    #[test]
    fn zdle_codec_round_trips_every_byte() {
        for b in 0..=255u8 {
            let encoded = zdle_encode(&[b]);
            assert_eq!(zdle_decode(&encoded), vec![b], "byte 0x{b:02X}");
        }
        let data: Vec<u8> = (0..=255u8).collect();
        assert_eq!(zdle_decode(&zdle_encode(&data)), data);
    }

    #[test]
    fn hex_header_round_trips() {
        for frame_type in [
            FrameType::ZRQInit,
            FrameType::ZRInit,
            FrameType::ZAck,
            FrameType::ZFile,
            FrameType::ZFin,
            FrameType::ZRPos,
            FrameType::ZEof,
        ] {
            let header = Header::from_flags(frame_type, 0x12, 0x34, 0x56, 0x78);
            let wire = header.build_hex();
            assert!(wire.starts_with(b"**\x18B"));
            assert!(wire.ends_with(b"\r\n"));
            let parsed = parse_hex_header(&wire).expect("header should parse");
            assert_eq!(parsed.header, header);
            assert_eq!(parsed.consumed, wire.len());
            assert!(!parsed.crc32);
        }
    }

    #[test]
    fn hex_header_parses_position() {
        let header = Header::from_number(FrameType::ZRPos, 0xDEAD_BEEF);
        let parsed = parse_hex_header(&header.build_hex()).unwrap();
        assert_eq!(parsed.header.number(), 0xDEAD_BEEF);
    }

    #[test]
    fn hex_header_skips_leading_garbage() {
        let mut wire = b"rz waiting...\r\n".to_vec();
        let header = Header::empty(FrameType::ZRQInit);
        wire.extend(header.build_hex());
        let parsed = parse_hex_header(&wire).unwrap();
        assert_eq!(parsed.header, header);
        assert_eq!(parsed.consumed, wire.len());
    }

    #[test]
    fn hex_header_rejects_corruption_and_short_input() {
        let mut wire = Header::empty(FrameType::ZRInit).build_hex();
        assert!(parse_hex_header(&wire[..wire.len() - 6]).is_none());
        // flip one hex digit of p0
        wire[6] = if wire[6] == b'0' { b'1' } else { b'0' };
        assert!(parse_hex_header(&wire).is_none());
    }

    #[test]
    fn bin_header_round_trips_with_escaped_parameters() {
        // parameter bytes that all require ZDLE escaping
        let header = Header::from_flags(FrameType::ZData, 0x18, 0x11, 0x8D, 0xFF);
        for use_crc32 in [false, true] {
            let wire = header.build_bin(use_crc32);
            let parsed = parse_bin_header(&wire).expect("header should parse");
            assert_eq!(parsed.header, header);
            assert_eq!(parsed.crc32, use_crc32);
            assert_eq!(parsed.consumed, wire.len());
        }
    }

    #[test]
    fn bin_header_rejects_crc_mismatch() {
        let mut wire = Header::from_number(FrameType::ZData, 1024).build_bin(false);
        let last = wire.len() - 1;
        wire[last] ^= 0x01;
        assert!(parse_bin_header(&wire).is_none());
    }

    #[test]
    fn subpacket_round_trips_all_end_types() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(1024).collect();
        for end_type in [ZCRCE, ZCRCG, ZCRCQ, ZCRCW] {
            for use_crc32 in [false, true] {
                let wire = build_subpacket(&payload, end_type, use_crc32);
                let parsed = parse_subpacket(&wire, use_crc32).expect("subpacket should parse");
                assert_eq!(parsed.payload, payload);
                assert_eq!(parsed.end_type, end_type);
                assert_eq!(parsed.consumed, wire.len());
            }
        }
    }

    #[test]
    fn subpacket_rejects_truncation_and_corruption() {
        let wire = build_subpacket(b"payload", ZCRCW, true);
        assert!(parse_subpacket(&wire[..wire.len() - 1], true).is_none());
        let mut bad = wire.clone();
        bad[1] ^= 0xFF;
        assert!(parse_subpacket(&bad, true).is_none());
    }

    #[test]
    fn detects_session_start_patterns() {
        assert!(detect(b"garbage **\x18B00 more"));
        assert!(detect(&[0x00, 0x2A, 0x18, 0x41, 0x00, 0x7F]));
        assert!(detect(&[0x2A, 0x18, 0x43, 0x00]));
        assert!(!detect(b"** plain text with stars"));
        assert!(!detect(&[0x2A, 0x18, 0x42]));
    }

    #[test]
    fn sanitizes_hostile_file_names() {
        assert_eq!(sanitize_file_name("readme.txt"), "readme.txt");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("foo/bar"), "bar");
        assert_eq!(sanitize_file_name("foo\\bar"), "bar");
        assert_eq!(sanitize_file_name(".hidden"), "download");
        assert_eq!(sanitize_file_name(""), "download");
        assert_eq!(sanitize_file_name(".."), "download");
        assert_eq!(sanitize_file_name("weird name!.txt"), "weird_name_.txt");
    }

    // receiver

    fn make_receiver(dir: &Path) -> (Rz, UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = unbounded_channel();
        (Rz::new(dir.to_path_buf(), tx), rx)
    }

    fn file_offer(name: &str, size: u64, use_crc32: bool) -> Vec<u8> {
        let mut wire = Header::empty(FrameType::ZFile).build_bin(use_crc32);
        let mut info = name.as_bytes().to_vec();
        info.push(0);
        info.extend_from_slice(format!("{size} 0 0").as_bytes());
        info.push(0);
        wire.extend(build_subpacket(&info, ZCRCW, use_crc32));
        wire
    }

    fn data_frame(offset: u32, payload: &[u8], end_type: u8, use_crc32: bool) -> Vec<u8> {
        let mut wire = Header::from_number(FrameType::ZData, offset).build_bin(use_crc32);
        wire.extend(build_subpacket(payload, end_type, use_crc32));
        wire
    }

    #[test]
    fn receiver_downloads_a_batch_of_two_files() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut rz, mut rx) = make_receiver(tmp.path());
        let mut sink = CaptureSink::new();

        rz.start(&mut sink, &Header::empty(FrameType::ZRQInit).build_hex());
        assert!(rz.is_active());
        // ZRINIT advertises full duplex + overlay I/O + CRC32
        assert!(sink.contains(b"**\x18B0100000023"));

        sink.clear();
        rz.feed(&mut sink, &file_offer("first.txt", 5, false));
        // the offer is answered with ZRPOS(0)
        assert!(sink.contains(b"**\x18B09"));
        rz.feed(&mut sink, &data_frame(0, b"hello", ZCRCE, false));
        rz.feed(&mut sink, &Header::from_number(FrameType::ZEof, 5).build_hex());

        assert_eq!(
            std::fs::read(tmp.path().join("first.txt")).unwrap(),
            b"hello"
        );
        // after ZEOF the receiver re-arms for the next file of the batch
        assert!(sink.contains(b"**\x18B0100000023"));
        assert!(rz.is_active());

        rz.feed(&mut sink, &file_offer("second.txt", 3, false));
        rz.feed(&mut sink, &data_frame(0, b"two", ZCRCE, false));
        rz.feed(&mut sink, &Header::from_number(FrameType::ZEof, 3).build_hex());
        assert_eq!(std::fs::read(tmp.path().join("second.txt")).unwrap(), b"two");

        sink.clear();
        rz.feed(&mut sink, &Header::empty(FrameType::ZFin).build_hex());
        // only the final ZFIN ends the session
        assert!(sink.contains(b"**\x18B08"));
        assert!(!rz.is_active());

        let events = drain(&mut rx);
        let finished: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ConnectionEvent::ZmodemFinished { success: true, .. }))
            .collect();
        assert_eq!(finished.len(), 2);
        assert!(events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::ZmodemStarted { file_name, size: 5 } if file_name == "first.txt")));
    }

    #[test]
    fn receiver_acknowledges_ack_requesting_subpackets() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut rz, mut rx) = make_receiver(tmp.path());
        let mut sink = CaptureSink::new();

        rz.start(&mut sink, b"");
        rz.feed(&mut sink, &file_offer("ack.bin", 8, true));
        sink.clear();
        rz.feed(&mut sink, &data_frame(0, b"ackdata!", ZCRCW, true));
        // ZCRCW expects ZACK with the byte count
        let ack = Header::from_number(FrameType::ZAck, 8).build_hex();
        assert!(sink.contains(&ack));
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ConnectionEvent::ZmodemProgress { bytes: 8, .. })));
    }

    #[test]
    fn receiver_honors_zdata_offset() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut rz, _rx) = make_receiver(tmp.path());
        let mut sink = CaptureSink::new();

        rz.start(&mut sink, b"");
        rz.feed(&mut sink, &file_offer("sparse.bin", 5, false));
        rz.feed(&mut sink, &data_frame(0, b"AAAAA", ZCRCG, false));
        // rewind to offset 2 and overwrite
        rz.feed(&mut sink, &data_frame(2, b"BBB", ZCRCE, false));
        rz.feed(&mut sink, &Header::from_number(FrameType::ZEof, 5).build_hex());

        assert_eq!(
            std::fs::read(tmp.path().join("sparse.bin")).unwrap(),
            b"AABBB"
        );
    }

    #[test]
    fn receiver_keeps_traversal_names_inside_download_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut rz, _rx) = make_receiver(tmp.path());
        let mut sink = CaptureSink::new();

        rz.start(&mut sink, b"");
        rz.feed(&mut sink, &file_offer("../../etc/passwd", 4, false));
        rz.feed(&mut sink, &data_frame(0, b"data", ZCRCE, false));
        rz.feed(&mut sink, &Header::from_number(FrameType::ZEof, 4).build_hex());

        // the basename landed inside the download dir, nothing escaped
        assert_eq!(std::fs::read(tmp.path().join("passwd")).unwrap(), b"data");
        assert!(!tmp.path().join("..").join("..").join("etc").join("passwd").exists());
    }

    #[test]
    fn receiver_renames_colliding_downloads() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("dup.txt"), b"old").unwrap();
        let (mut rz, _rx) = make_receiver(tmp.path());
        let mut sink = CaptureSink::new();

        rz.start(&mut sink, b"");
        rz.feed(&mut sink, &file_offer("dup.txt", 3, false));
        rz.feed(&mut sink, &data_frame(0, b"new", ZCRCE, false));
        rz.feed(&mut sink, &Header::from_number(FrameType::ZEof, 3).build_hex());

        assert_eq!(std::fs::read(tmp.path().join("dup.txt")).unwrap(), b"old");
        assert_eq!(std::fs::read(tmp.path().join("dup_1.txt")).unwrap(), b"new");
    }

    #[test]
    fn receiver_reports_remote_cancellation() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut rz, mut rx) = make_receiver(tmp.path());
        let mut sink = CaptureSink::new();

        rz.start(&mut sink, b"");
        rz.feed(&mut sink, &Header::empty(FrameType::ZCan).build_hex());
        assert!(!rz.is_active());
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ConnectionEvent::ZmodemError(msg) if msg.contains("cancelled by server"))));
    }

    #[test]
    fn receiver_aborts_on_buffer_overflow() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut rz, mut rx) = make_receiver(tmp.path());
        let mut sink = CaptureSink::new();

        rz.start(&mut sink, b"");
        sink.clear();
        rz.feed(&mut sink, &vec![0x00; 70 * 1024]);
        assert!(!rz.is_active());
        // the abort sequence went out
        assert!(sink.contains(&[0x18; 8]));
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ConnectionEvent::ZmodemError(msg) if msg.contains("overflow"))));
    }

    #[test]
    fn receiver_skips_line_noise_to_the_next_frame() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut rz, _rx) = make_receiver(tmp.path());
        let mut sink = CaptureSink::new();

        rz.start(&mut sink, b"");
        sink.clear();
        let mut noisy = vec![b'A'; 1500];
        noisy.extend(Header::empty(FrameType::ZRQInit).build_hex());
        rz.feed(&mut sink, &noisy);
        // the buried ZRQINIT was found and answered
        assert!(sink.contains(b"**\x18B0100000023"));
    }

    #[test]
    fn receiver_times_out_without_a_file_offer() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut rz, mut rx) = make_receiver(tmp.path());
        let mut sink = CaptureSink::new();

        // detector hit, but the "session" never sends ZFILE
        rz.start(&mut sink, b"**\x18B00");
        assert!(rz.is_active());
        rz.check_timeout(&mut sink);
        assert!(rz.is_active());

        rz.state_since = Instant::now() - Duration::from_secs(31);
        sink.clear();
        rz.check_timeout(&mut sink);
        assert!(!rz.is_active());
        assert!(sink.contains(&[0x18; 8]));
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ConnectionEvent::ZmodemError(msg) if msg.contains("timeout"))));
    }

    #[test]
    fn receiver_times_out_when_stalled() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut rz, mut rx) = make_receiver(tmp.path());
        let mut sink = CaptureSink::new();

        rz.start(&mut sink, b"");
        rz.started_at = Instant::now() - Duration::from_secs(120);
        rz.state_since = Instant::now();
        rz.check_timeout(&mut sink);
        assert!(!rz.is_active());
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ConnectionEvent::ZmodemError(msg) if msg.contains("no data"))));
    }

    // sender

    fn make_sender() -> (Sz, UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = unbounded_channel();
        (Sz::new(tx), rx)
    }

    #[test]
    fn sender_streams_a_file_end_to_end() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("note.txt");
        std::fs::write(&path, b"over the wire").unwrap();
        let (mut sz, mut rx) = make_sender();
        let mut sink = CaptureSink::new();

        sz.start_upload(&mut sink, &path);
        assert!(sz.is_active());
        assert!(sink.contains(b"**\x18B00"));

        // receiver is CRC32-capable
        sink.clear();
        sz.feed(&mut sink, &zrinit(0x23));
        let offer = sink.bytes();
        assert!(offer.starts_with(&[b'*', 0x18, b'C']));
        let header = parse_bin_header(&offer).unwrap();
        assert_eq!(header.header.frame_type, FrameType::ZFile);
        let info = parse_subpacket(&offer[header.consumed..], true).unwrap();
        assert!(info.payload.starts_with(b"note.txt\x0013 0 0"));

        sink.clear();
        sz.feed(&mut sink, &Header::from_number(FrameType::ZRPos, 0).build_hex());
        let stream = sink.bytes();
        let data_header = parse_bin_header(&stream).unwrap();
        assert_eq!(data_header.header.frame_type, FrameType::ZData);
        assert_eq!(data_header.header.number(), 0);
        let block = parse_subpacket(&stream[data_header.consumed..], true).unwrap();
        assert_eq!(block.payload, b"over the wire");
        assert_eq!(block.end_type, ZCRCE);
        let eof = parse_hex_header(&stream[data_header.consumed + block.consumed..]).unwrap();
        assert_eq!(eof.header.frame_type, FrameType::ZEof);
        assert_eq!(eof.header.number(), 13);

        // receiver re-arms: the file made it
        sink.clear();
        sz.feed(&mut sink, &zrinit(0x23));
        assert!(sink.contains(b"**\x18B08"));
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ConnectionEvent::ZmodemFinished { success: true, .. })));

        sink.clear();
        sz.feed(&mut sink, &Header::empty(FrameType::ZFin).build_hex());
        assert!(sink.contains(b"OO"));
        assert!(!sz.is_active());
    }

    #[test]
    fn sender_resumes_from_requested_offset() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("resume.bin");
        std::fs::write(&path, b"0123456789").unwrap();
        let (mut sz, _rx) = make_sender();
        let mut sink = CaptureSink::new();

        sz.start_upload(&mut sink, &path);
        sz.feed(&mut sink, &zrinit(0));
        sink.clear();
        sz.feed(&mut sink, &Header::from_number(FrameType::ZRPos, 6).build_hex());

        let stream = sink.bytes();
        let data_header = parse_bin_header(&stream).unwrap();
        assert_eq!(data_header.header.number(), 6);
        let block = parse_subpacket(&stream[data_header.consumed..], false).unwrap();
        assert_eq!(block.payload, b"6789");
    }

    #[test]
    fn sender_gives_up_after_too_many_rewinds() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("retry.txt");
        std::fs::write(&path, b"x").unwrap();
        let (mut sz, mut rx) = make_sender();
        let mut sink = CaptureSink::new();

        sz.start_upload(&mut sink, &path);
        sz.feed(&mut sink, &zrinit(0));
        let zrpos = Header::from_number(FrameType::ZRPos, 0).build_hex();
        for _ in 0..5 {
            sz.feed(&mut sink, &zrpos);
            assert!(sz.is_active());
        }
        sink.clear();
        sz.feed(&mut sink, &zrpos);
        assert!(!sz.is_active());
        assert!(sink.contains(&[0x18; 8]));
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ConnectionEvent::ZmodemError(msg) if msg.contains("too many retries"))));
    }

    #[test]
    fn sender_rejects_bad_upload_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut sz, mut rx) = make_sender();
        let mut sink = CaptureSink::new();

        sz.start_upload(&mut sink, &tmp.path().join("missing.txt"));
        assert!(!sz.is_active());
        sz.start_upload(&mut sink, tmp.path());
        assert!(!sz.is_active());
        let events = drain(&mut rx);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ConnectionEvent::ZmodemError(_)))
                .count(),
            2
        );
    }

    #[test]
    fn sender_honors_skip_and_cancel() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("skipped.txt");
        std::fs::write(&path, b"abc").unwrap();

        let (mut sz, _rx) = make_sender();
        let mut sink = CaptureSink::new();
        sz.start_upload(&mut sink, &path);
        sz.feed(&mut sink, &zrinit(0));
        sink.clear();
        sz.feed(&mut sink, &Header::empty(FrameType::ZSkip).build_hex());
        assert!(sink.contains(b"**\x18B08"));
        assert!(!sz.is_active());

        let (mut sz, mut rx) = make_sender();
        let mut sink = CaptureSink::new();
        sz.start_upload(&mut sink, &path);
        sz.feed(&mut sink, &Header::empty(FrameType::ZCan).build_hex());
        assert!(!sz.is_active());
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ConnectionEvent::ZmodemError(msg) if msg.contains("cancelled"))));
    }
}
