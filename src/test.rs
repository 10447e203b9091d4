use crate::{
    num::{u15, u28},
    ChannelMessage, Error, Format, Header, Message, MetaMessage, Note, Smf, Tempo, Timing,
};

fn note(channel: u8, pitch: u8, velocity: u8) -> Note {
    Note::new(channel, pitch, velocity).unwrap()
}

fn on(note: Note, delta: u32) -> Message {
    Message::Channel(ChannelMessage::NoteOn {
        note,
        delta: u28::new(delta),
    })
}

fn off(note: Note, delta: u32) -> Message {
    Message::Channel(ChannelMessage::NoteOff {
        note,
        delta: u28::new(delta),
    })
}

/// A single-track file at 48 ticks per beat with the given track body.
fn single_track(body: &[u8]) -> Vec<u8> {
    let mut file = b"MThd\0\0\0\x06\0\0\0\x01\0\x30MTrk".to_vec();
    file.extend_from_slice(&(body.len() as u32).to_be_bytes());
    file.extend_from_slice(body);
    file
}

const EOT: [u8; 4] = [0x00, 0xFF, 0x2F, 0x00];

mod note {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::{KeySignature, Scale, Tonic};

    #[test]
    fn fields_are_range_checked() {
        assert_eq!(
            Note::new(16, 60, 100),
            Err(Error::InvalidFieldRange {
                field: "channel",
                value: 16
            })
        );
        assert_eq!(
            Note::new(0, 128, 100),
            Err(Error::InvalidFieldRange {
                field: "pitch",
                value: 128
            })
        );
        assert_eq!(
            Note::new(0, 60, 200),
            Err(Error::InvalidFieldRange {
                field: "velocity",
                value: 200
            })
        );
        let max = Note::new(15, 127, 127).unwrap();
        assert_eq!(max.channel().as_int(), 15);
        assert_eq!(max.pitch().as_int(), 127);
    }

    #[test]
    fn transpose() {
        let middle_c = note(0, 60, 100);
        assert_eq!(middle_c.transpose(12).unwrap(), note(0, 72, 100));
        assert_eq!(middle_c.transpose(-60).unwrap(), note(0, 0, 100));
        assert!(middle_c.transpose(-61).unwrap_err().is_transform());
        assert!(middle_c.transpose(68).unwrap_err().is_transform());
    }

    #[test]
    fn names() {
        assert_eq!(note(0, 60, 0).name(), "C4");
        assert_eq!(note(0, 61, 0).name(), "C#4");
        assert_eq!(note(0, 0, 0).name(), "C-1");
        assert_eq!(note(0, 127, 0).name(), "G9");
    }

    #[test]
    fn key_offsets() {
        let c_major = KeySignature::new(Tonic::C, Scale::Major);
        let d_major = KeySignature::new(Tonic::D, Scale::Major);
        let a_minor = KeySignature::new(Tonic::A, Scale::Minor);
        assert_eq!(c_major.offset_to(&d_major), 2);
        assert_eq!(d_major.offset_to(&c_major), 10);
        assert_eq!(a_minor.offset_to(&c_major), 0);
        assert_eq!(a_minor.relative_major(), Tonic::C);
    }
}

mod meta {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::{KeySignature, RawMetaMessage, Scale, TimeSignature, Tonic};

    fn decode(type_code: u8, data: &[u8]) -> crate::Result<MetaMessage> {
        MetaMessage::try_from(&RawMetaMessage::new(type_code, data.to_vec(), u28::new(0)))
    }

    #[test]
    fn tempo_bytes() {
        let tempo = Tempo::from_bpm(120.0).unwrap();
        assert_eq!(tempo.micros_per_beat().as_int(), 500_000);
        assert_eq!(tempo, Tempo::DEFAULT);
        let raw = MetaMessage::Tempo {
            tempo,
            delta: u28::new(0),
        }
        .to_raw();
        assert_eq!(raw.type_code, 0x51);
        assert_eq!(raw.data, vec![0x07, 0xA1, 0x20]);
        assert_eq!(
            decode(0x51, &[0x07, 0xA1, 0x20]).unwrap(),
            MetaMessage::Tempo {
                tempo,
                delta: u28::new(0)
            }
        );
    }

    #[test]
    fn tempo_out_of_range() {
        assert_eq!(Tempo::from_bpm(1.0), Err(Error::TempoOutOfRange(1.0)));
        assert_eq!(Tempo::from_bpm(0.0), Err(Error::TempoOutOfRange(0.0)));
        assert!(matches!(
            Tempo::from_bpm(f64::NAN),
            Err(Error::TempoOutOfRange(_))
        ));
        assert!(matches!(
            Tempo::from_bpm(f64::INFINITY),
            Err(Error::TempoOutOfRange(_))
        ));
        //A beat shorter than half a microsecond
        assert!(Tempo::from_bpm(1e9).is_err());
        assert!(Tempo::from_bpm(4.0).is_ok());
        assert!(matches!(
            decode(0x51, &[0, 0, 0]),
            Err(Error::TempoOutOfRange(_))
        ));
    }

    #[test]
    fn time_signature_bytes() {
        let six_eight = TimeSignature::new(6, 8, 24, 8).unwrap();
        assert_eq!(six_eight.denominator(), 8);
        assert_eq!(six_eight.denominator_log2(), 3);
        let raw = MetaMessage::TimeSignature {
            signature: six_eight,
            delta: u28::new(0),
        }
        .to_raw();
        assert_eq!(raw.data, vec![6, 3, 24, 8]);
        assert_eq!(
            decode(0x58, &[6, 3, 24, 8]).unwrap(),
            MetaMessage::TimeSignature {
                signature: six_eight,
                delta: u28::new(0)
            }
        );
    }

    #[test]
    fn time_signature_denominators() {
        for &denominator in &[2, 4, 8, 16, 32] {
            let sig = TimeSignature::new(4, denominator, 24, 8).unwrap();
            assert_eq!(sig.denominator(), denominator);
        }
        assert_eq!(
            TimeSignature::new(3, 3, 24, 8),
            Err(Error::InvalidDenominator(3))
        );
        assert_eq!(
            TimeSignature::new(3, 64, 24, 8),
            Err(Error::InvalidDenominator(64))
        );
        assert_eq!(
            TimeSignature::from_log2(4, 0, 24, 8),
            Err(Error::InvalidDenominator(1))
        );
        assert_eq!(
            decode(0x58, &[4, 6, 24, 8]),
            Err(Error::InvalidDenominator(64))
        );
    }

    #[test]
    fn key_signature_bytes() {
        let d_major = KeySignature::new(Tonic::D, Scale::Major);
        let d_minor = KeySignature::new(Tonic::D, Scale::Minor);
        assert_eq!(d_major.to_sharps_flats(), (2, 0));
        assert_eq!(d_minor.to_sharps_flats(), (-1, 1));
        let raw = MetaMessage::KeySignature {
            key: d_minor,
            delta: u28::new(0),
        }
        .to_raw();
        assert_eq!(raw.data, vec![0xFF, 0x01]);
        assert_eq!(
            decode(0x59, &[0x02, 0x00]).unwrap(),
            MetaMessage::KeySignature {
                key: d_major,
                delta: u28::new(0)
            }
        );
    }

    #[test]
    fn every_key_survives() {
        for &tonic in Tonic::ALL.iter() {
            for &scale in &[Scale::Major, Scale::Minor] {
                let key = KeySignature::new(tonic, scale);
                let (sharps_flats, mode) = key.to_sharps_flats();
                assert!((-5..=6).contains(&sharps_flats));
                assert_eq!(KeySignature::from_sharps_flats(sharps_flats, mode), Ok(key));
            }
        }
        assert_eq!(
            KeySignature::from_sharps_flats(6, 0),
            Ok(KeySignature::new(Tonic::Gb, Scale::Major))
        );
        assert_eq!(
            KeySignature::from_sharps_flats(6, 1),
            Ok(KeySignature::new(Tonic::Eb, Scale::Minor))
        );
    }

    #[test]
    fn invalid_key_signatures() {
        assert_eq!(
            KeySignature::from_sharps_flats(7, 0),
            Err(Error::InvalidKeySignature {
                sharps_flats: 7,
                mode: 0
            })
        );
        assert_eq!(
            KeySignature::from_sharps_flats(-6, 1),
            Err(Error::InvalidKeySignature {
                sharps_flats: -6,
                mode: 1
            })
        );
        assert_eq!(
            decode(0x59, &[0x00, 0x02]),
            Err(Error::InvalidKeySignature {
                sharps_flats: 0,
                mode: 2
            })
        );
    }

    #[test]
    fn payload_lengths() {
        assert!(matches!(
            decode(0x51, &[0x07, 0xA1]),
            Err(Error::TruncatedData(_))
        ));
        assert!(matches!(
            decode(0x51, &[0x07, 0xA1, 0x20, 0x00]),
            Err(Error::MalformedChunk(_))
        ));
        assert_eq!(
            decode(0x03, b"name"),
            Err(Error::UnrecognizedMetaType(0x03))
        );
    }

    #[test]
    fn meta_wire_form() {
        use crate::RawMessage;

        let raw = RawMetaMessage::new(0x51, vec![0x07, 0xA1, 0x20], u28::new(7));
        let wire = raw.to_message().unwrap();
        assert_eq!(wire.status, 0xFF);
        assert_eq!(wire.data, vec![0x51, 0x03, 0x07, 0xA1, 0x20]);
        assert_eq!(wire.delta, u28::new(7));
        assert_eq!(RawMetaMessage::try_from(&wire), Ok(raw));

        let trailing = RawMessage {
            status: 0xFF,
            data: vec![0x51, 0x03, 0x07, 0xA1, 0x20, 0x00],
            delta: u28::new(0),
        };
        assert_eq!(
            RawMetaMessage::try_from(&trailing),
            Err(Error::MalformedChunk("trailing bytes after meta event payload"))
        );
        let not_meta = RawMessage {
            status: 0x90,
            data: vec![60, 100],
            delta: u28::new(0),
        };
        assert_eq!(
            RawMetaMessage::try_from(&not_meta),
            Err(Error::UnrecognizedStatus(0x90))
        );
    }

    #[test]
    fn channel_wire_form() {
        use crate::RawMessage;

        let msg = ChannelMessage::NoteOn {
            note: note(3, 60, 100),
            delta: u28::new(12),
        };
        let wire = RawMessage::from(&msg);
        assert_eq!(wire.status, 0x93);
        assert_eq!(wire.data, vec![60, 100]);
        assert_eq!(ChannelMessage::try_from(&wire), Ok(msg));

        let tick = ChannelMessage::TimingTick { delta: u28::new(0) };
        assert_eq!(tick.to_raw().data, Vec::<u8>::new());
        assert_eq!(ChannelMessage::try_from(&tick.to_raw()), Ok(tick));

        let trailing = RawMessage {
            data: vec![60, 100, 0],
            ..wire.clone()
        };
        assert_eq!(
            ChannelMessage::try_from(&trailing),
            Err(Error::MalformedChunk("trailing bytes after channel message"))
        );
        let high_bit = RawMessage {
            data: vec![0x80, 0],
            ..wire.clone()
        };
        assert_eq!(
            ChannelMessage::try_from(&high_bit),
            Err(Error::MalformedChunk("data byte with top bit set"))
        );
        let meta = RawMessage {
            status: 0xFF,
            ..wire
        };
        assert_eq!(
            ChannelMessage::try_from(&meta),
            Err(Error::UnrecognizedStatus(0xFF))
        );
    }
}

mod codec {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::{
        io::IoWrap,
        primitive::IntReadBottom7,
        KeySignature, RawMetaMessage, Scale, TimeSignature, Tonic,
    };

    fn varlen(bytes: &[u8]) -> crate::Result<u32> {
        let mut raw = bytes;
        u28::read_u7(&mut raw).map(u28::as_int)
    }

    fn encode_varlen(int: u32) -> Vec<u8> {
        let mut out = Vec::new();
        u28::new(int).write_varlen(&mut out).unwrap();
        out
    }

    #[test]
    fn varlen_ints() {
        assert_eq!(varlen(&[0x00]), Ok(0));
        assert_eq!(varlen(&[0x81, 0x00]), Ok(128));
        assert_eq!(varlen(&[0xFF, 0xFF, 0xFF, 0x7F]), Ok(0x0FFF_FFFF));
        assert!(matches!(
            varlen(&[0x80, 0x80]),
            Err(Error::TruncatedData(_))
        ));
        assert_eq!(
            varlen(&[0x80, 0x80, 0x80, 0x80, 0x00]),
            Err(Error::VarlenOverflow)
        );

        assert_eq!(encode_varlen(0), vec![0x00]);
        assert_eq!(encode_varlen(127), vec![0x7F]);
        assert_eq!(encode_varlen(128), vec![0x81, 0x00]);
        assert_eq!(encode_varlen(0x0FFF_FFFF), vec![0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn note_on_then_off() {
        let mut body = vec![0x00, 0x90, 60, 100, 0x18, 0x80, 60, 0];
        body.extend_from_slice(&EOT);
        let smf = Smf::parse(&single_track(&body)).unwrap();
        assert_eq!(smf.header.format, Format::SingleTrack);
        assert_eq!(smf.ticks_per_beat(), Some(48));
        assert_eq!(
            smf.tracks,
            vec![vec![on(note(0, 60, 100), 0), off(note(0, 60, 0), 24)]]
        );
    }

    #[test]
    fn running_status() {
        let mut body = vec![0x00, 0x91, 60, 100, 0x10, 64, 100, 0x08, 60, 0];
        body.extend_from_slice(&EOT);
        let smf = Smf::parse(&single_track(&body)).unwrap();
        assert_eq!(
            smf.tracks[0],
            vec![
                on(note(1, 60, 100), 0),
                on(note(1, 64, 100), 16),
                on(note(1, 60, 0), 8),
            ]
        );
    }

    #[test]
    fn meta_cancels_running_status() {
        let mut body = vec![
            0x00, 0x90, 60, 100, 0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20, 0x00, 60, 0,
        ];
        body.extend_from_slice(&EOT);
        assert_eq!(
            Smf::parse(&single_track(&body)),
            Err(Error::UnrecognizedStatus(60))
        );
        assert_eq!(
            Smf::parse(&single_track(&[0x00, 60, 100])),
            Err(Error::UnrecognizedStatus(60))
        );
    }

    #[test]
    fn unsupported_status() {
        let body = [0x00, 0xB0, 7, 100, 0x00, 0xFF, 0x2F, 0x00];
        assert_eq!(
            Smf::parse(&single_track(&body)),
            Err(Error::UnrecognizedStatus(0xB0))
        );
    }

    #[test]
    fn timing_tick() {
        let mut body = vec![0x00, 0x90, 60, 100, 0x04, 0xF8, 0x04, 0x80, 60, 0];
        body.extend_from_slice(&EOT);
        let smf = Smf::parse(&single_track(&body)).unwrap();
        assert_eq!(
            smf.tracks[0][1],
            Message::Channel(ChannelMessage::TimingTick {
                delta: u28::new(4)
            })
        );
        assert_eq!(smf.tracks[0].len(), 3);
    }

    #[test]
    #[cfg(not(feature = "strict"))]
    fn unknown_meta_kept_opaque() {
        let mut body = vec![0x00, 0xFF, 0x03, 0x02, b'h', b'i', 0x00, 0x90, 60, 100];
        body.extend_from_slice(&EOT);
        let file = single_track(&body);
        let smf = Smf::parse(&file).unwrap();
        assert_eq!(
            smf.tracks[0][0],
            Message::RawMeta(RawMetaMessage::new(0x03, b"hi".to_vec(), u28::new(0)))
        );
        assert_eq!(smf.to_bytes().unwrap(), file);
    }

    #[test]
    #[cfg(feature = "strict")]
    fn unknown_meta_rejected() {
        let mut body = vec![0x00, 0xFF, 0x03, 0x02, b'h', b'i'];
        body.extend_from_slice(&EOT);
        assert_eq!(
            Smf::parse(&single_track(&body)),
            Err(Error::UnrecognizedMetaType(0x03))
        );
    }

    #[test]
    #[cfg(not(feature = "strict"))]
    fn end_of_track_stops_decoding() {
        let mut body = EOT.to_vec();
        body.extend_from_slice(&[0x00, 0x90, 60, 100]);
        let smf = Smf::parse(&single_track(&body)).unwrap();
        assert_eq!(smf.tracks, vec![Vec::<Message>::new()]);

        let smf = Smf::parse(&single_track(&[0x00, 0x90, 60, 100])).unwrap();
        assert_eq!(smf.tracks[0], vec![on(note(0, 60, 100), 0)]);
    }

    #[test]
    fn chunk_errors() {
        assert_eq!(
            Smf::parse(&[]),
            Err(Error::MalformedChunk("no header chunk"))
        );
        assert_eq!(
            Smf::parse(b"MT"),
            Err(Error::TruncatedData("failed to read chunk id"))
        );
        assert_eq!(
            Smf::parse(b"RIFF\0\0\0\0"),
            Err(Error::MalformedChunk("unrecognized chunk type"))
        );
        assert_eq!(
            Smf::parse(b"MThd\0\0\0\x64\0\0\0\x01\0\x30"),
            Err(Error::MalformedChunk(
                "chunk length exceeds the remaining data"
            ))
        );
        let mut file = single_track(&EOT);
        file.truncate(file.len() - 1);
        assert_eq!(
            Smf::parse(&file),
            Err(Error::MalformedChunk(
                "chunk length exceeds the remaining data"
            ))
        );
    }

    fn sample_smf() -> Smf {
        let meta = |meta: MetaMessage| Message::Meta(meta);
        Smf::new(
            Header::new(Format::Parallel, Timing::Metrical(u15::new(96))),
            vec![
                vec![
                    meta(MetaMessage::Tempo {
                        tempo: Tempo::from_bpm(90.0).unwrap(),
                        delta: u28::new(0),
                    }),
                    meta(MetaMessage::TimeSignature {
                        signature: TimeSignature::new(3, 4, 24, 8).unwrap(),
                        delta: u28::new(0),
                    }),
                    meta(MetaMessage::KeySignature {
                        key: KeySignature::new(Tonic::D, Scale::Minor),
                        delta: u28::new(0),
                    }),
                ],
                vec![
                    on(note(2, 62, 90), 0),
                    Message::Channel(ChannelMessage::TimingTick {
                        delta: u28::new(200),
                    }),
                    off(note(2, 62, 0), 40_000),
                ],
            ],
        )
    }

    #[test]
    fn write_then_parse() {
        let smf = sample_smf();
        let bytes = smf.to_bytes().unwrap();
        assert_eq!(&bytes[..14], b"MThd\0\0\0\x06\0\x01\0\x02\0\x60");
        assert_eq!(Smf::parse(&bytes), Ok(smf.clone()));

        let mut wrapped = IoWrap(Vec::new());
        smf.write(&mut wrapped).unwrap();
        assert_eq!(wrapped.0, bytes);
    }

    #[test]
    fn lazy_tracks() {
        let bytes = sample_smf().to_bytes().unwrap();
        let (header, tracks) = crate::parse(&bytes).unwrap();
        assert_eq!(header.timing, Timing::Metrical(u15::new(96)));
        let counts = tracks
            .map(|track| track.unwrap().count())
            .collect::<Vec<_>>();
        assert_eq!(counts, vec![3, 3]);
    }

    #[test]
    fn merge_parallel_tracks() {
        let tempo = Message::Meta(MetaMessage::Tempo {
            tempo: Tempo::DEFAULT,
            delta: u28::new(0),
        });
        let a = note(0, 60, 100);
        let b = note(1, 64, 100);
        let smf = Smf::new(
            Header::new(Format::Parallel, Timing::Metrical(u15::new(48))),
            vec![
                vec![tempo.clone(), on(a, 10)],
                vec![on(b, 5), off(b, 10), on(b, 0)],
            ],
        );
        assert_eq!(
            smf.merged(),
            vec![tempo, on(b, 5), on(a, 5), off(b, 5), on(b, 0)]
        );
    }

    #[test]
    fn merge_sequential_tracks() {
        let a = note(0, 60, 100);
        let smf = Smf::new(
            Header::new(Format::Sequential, Timing::Metrical(u15::new(48))),
            vec![vec![on(a, 0), off(a, 10)], vec![on(a, 3), off(a, 10)]],
        );
        assert_eq!(
            smf.merged(),
            vec![on(a, 0), off(a, 10), on(a, 3), off(a, 10)]
        );
    }
}

mod region {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::{
        combine_regions, messages_to_region, region_to_messages, KeySignature, MetaState, Region,
        Scale, TimedNote, Tonic,
    };

    fn timed(note: Note, start: Option<i64>, end: Option<i64>) -> TimedNote {
        TimedNote::new(note, start, end).unwrap()
    }

    #[test]
    fn pairs_notes() {
        let messages = [0x00, 0x90, 60, 100, 0x18, 0x80, 60, 0];
        let track = Smf::parse(&single_track(&[&messages[..], &EOT[..]].concat()))
            .unwrap()
            .tracks
            .remove(0);
        let region = messages_to_region(&track, MetaState::default());
        assert_eq!(region.len(), 1);
        let n = &region.notes()[0];
        assert_eq!(n.start(), Some(0));
        assert_eq!(n.end(), Some(24));
        assert_eq!(n.note().pitch().as_int(), 60);
        assert_eq!(n.note().velocity().as_int(), 100);
    }

    #[test]
    fn unpaired_events() {
        let a = note(0, 60, 100);
        let b = note(0, 64, 100);
        let region = messages_to_region(&[on(a, 5), off(b, 5)], MetaState::default());
        assert_eq!(
            region.notes(),
            &[timed(b, None, Some(10)), timed(a, Some(5), None)]
        );
    }

    #[test]
    fn retriggered_pitch() {
        let a = note(0, 60, 100);
        let louder = note(0, 60, 120);
        let region = messages_to_region(
            &[on(a, 0), on(louder, 10), off(a, 10)],
            MetaState::default(),
        );
        assert_eq!(
            region.notes(),
            &[timed(a, Some(0), None), timed(louder, Some(10), Some(20))]
        );
    }

    #[test]
    fn metas_fold_into_state() {
        let d_major = KeySignature::new(Tonic::D, Scale::Major);
        let a = note(0, 60, 100);
        let messages = [
            Message::Meta(MetaMessage::KeySignature {
                key: d_major,
                delta: u28::new(10),
            }),
            Message::Meta(MetaMessage::Tempo {
                tempo: Tempo::from_bpm(60.0).unwrap(),
                delta: u28::new(0),
            }),
            on(a, 5),
            off(a, 5),
        ];
        let region = messages_to_region(&messages, MetaState::default());
        assert_eq!(region.state().key(), d_major);
        assert_eq!(region.state().tempo().micros_per_beat().as_int(), 1_000_000);
        assert_eq!(region.notes(), &[timed(a, Some(15), Some(20))]);
    }

    #[test]
    fn flatten_orders_ons_first() {
        let a = note(0, 60, 100);
        let b = note(0, 64, 100);
        let c = note(0, 67, 100);
        let region = Region::new(
            vec![
                timed(c, Some(24), Some(48)),
                timed(a, Some(0), Some(24)),
                timed(b, Some(0), Some(48)),
            ],
            MetaState::default(),
        );
        let (flat, state) = region_to_messages(&region).unwrap();
        assert_eq!(state, MetaState::default());
        let flat = flat.into_iter().map(Message::from).collect::<Vec<_>>();
        assert_eq!(
            flat,
            vec![
                on(a, 0),
                on(b, 0),
                on(c, 24),
                off(a, 0),
                off(b, 24),
                off(c, 0),
            ]
        );
        assert_eq!(messages_to_region(&flat, state), region);
    }

    #[test]
    fn repeated_notes_pair_again() {
        let a = note(0, 60, 100);
        let messages = [on(a, 0), off(a, 24), on(a, 0), off(a, 24)];
        let region = messages_to_region(&messages, MetaState::default());
        assert_eq!(
            region.notes(),
            &[timed(a, Some(0), Some(24)), timed(a, Some(24), Some(48))]
        );
        let (flat, state) = region_to_messages(&region).unwrap();
        let flat = flat.into_iter().map(Message::from).collect::<Vec<_>>();
        assert_eq!(flat, messages.to_vec());
        assert_eq!(messages_to_region(&flat, state), region);
    }

    #[test]
    fn zero_length_note_keeps_order() {
        let a = note(0, 60, 100);
        let region = Region::new(
            vec![timed(a, Some(0), Some(10)), timed(a, Some(10), Some(10))],
            MetaState::default(),
        );
        let (flat, _) = region_to_messages(&region).unwrap();
        let flat = flat.into_iter().map(Message::from).collect::<Vec<_>>();
        assert_eq!(flat, vec![on(a, 0), off(a, 10), on(a, 0), off(a, 0)]);
    }

    #[test]
    fn flatten_open_notes() {
        let a = note(0, 60, 100);
        let b = note(0, 62, 100);
        let region = Region::new(
            vec![timed(a, None, Some(12)), timed(b, Some(6), None)],
            MetaState::default(),
        );
        let (flat, _) = region_to_messages(&region).unwrap();
        let flat = flat.into_iter().map(Message::from).collect::<Vec<_>>();
        assert_eq!(flat, vec![on(b, 6), off(a, 6)]);
    }

    #[test]
    fn flatten_rejects_negative_ticks() {
        let region = Region::new(
            vec![timed(note(0, 60, 100), Some(-5), Some(3))],
            MetaState::default(),
        );
        assert!(region_to_messages(&region).unwrap_err().is_transform());
    }

    #[test]
    fn timed_note_bounds() {
        let a = note(0, 60, 100);
        assert_eq!(
            TimedNote::new(a, Some(10), Some(3)),
            Err(Error::InvalidFieldRange {
                field: "end",
                value: 3
            })
        );
        let n = timed(a, Some(10), Some(20));
        assert!(n.is_on_at(10));
        assert!(n.is_on_at(20));
        assert!(!n.is_on_at(9));
        assert!(!n.is_on_at(21));
        assert!(timed(a, None, Some(20)).is_on_at(-1_000));
        assert!(timed(a, Some(0), None).is_on_at(1_000_000_000));
    }

    #[test]
    fn collection_ops() {
        let a = timed(note(0, 60, 100), Some(0), Some(10));
        let b = timed(note(0, 62, 100), Some(5), Some(15));
        let c = timed(note(0, 64, 100), Some(5), None);
        let mut region = Region::new(vec![b, a], MetaState::default());
        region.insert(c);
        assert_eq!(region.notes(), &[a, b, c]);
        assert_eq!(region.notes_on_at(10), vec![&a, &b, &c]);
        assert_eq!(region.notes_on_at(16), vec![&c]);
        assert!(region.remove(&b));
        assert!(!region.remove(&b));
        assert!(region.contains(&a));
        assert_eq!(region.len(), 2);
        region.clear();
        assert!(region.is_empty());
    }

    #[test]
    fn combine() {
        let a = timed(note(0, 60, 100), Some(10), Some(20));
        let b = timed(note(1, 62, 100), Some(0), Some(20));
        let c = timed(note(2, 64, 100), Some(10), Some(30));
        let state = MetaState::default().with_key(KeySignature::new(Tonic::E, Scale::Minor));
        let combined = combine_regions(
            vec![
                Region::new(vec![a], MetaState::default()),
                Region::new(vec![b, c], MetaState::default()),
            ],
            state,
        );
        assert_eq!(combined.notes(), &[b, a, c]);
        assert_eq!(combined.state(), &state);
    }
}

mod transform {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::{
        HarmonizerTransform, Interval, KeySignature, MetaMidiStream, MetaState, Region, Scale,
        SetChannelTransform, TimedNote, Tonic, Transform, TransformPipeline, TransposeTransform,
    };

    fn region(pitches: &[u8], key: KeySignature) -> Region {
        let notes = pitches
            .iter()
            .enumerate()
            .map(|(i, &pitch)| {
                let start = i as i64 * 10;
                TimedNote::new(note(0, pitch, 100), Some(start), Some(start + 10)).unwrap()
            })
            .collect();
        Region::new(notes, MetaState::default().with_key(key))
    }

    fn pitches(region: &Region) -> Vec<u8> {
        region.iter().map(|n| n.note().pitch().as_int()).collect()
    }

    #[test]
    fn set_channel() {
        let notes = vec![
            TimedNote::new(note(0, 60, 100), None, Some(100)).unwrap(),
            TimedNote::new(note(1, 62, 90), Some(0), Some(50)).unwrap(),
            TimedNote::new(note(2, 64, 80), Some(10), None).unwrap(),
            TimedNote::new(note(3, 65, 70), Some(20), Some(30)).unwrap(),
            TimedNote::new(note(15, 67, 60), Some(40), Some(40)).unwrap(),
        ];
        let input = Region::new(notes, MetaState::default());
        let output = SetChannelTransform::new(9)
            .unwrap()
            .apply(input.clone())
            .unwrap();
        assert_eq!(output.len(), input.len());
        for (before, after) in input.iter().zip(output.iter()) {
            assert_eq!(after.note().channel().as_int(), 9);
            assert_eq!(after.note().pitch(), before.note().pitch());
            assert_eq!(after.note().velocity(), before.note().velocity());
            assert_eq!(after.start(), before.start());
            assert_eq!(after.end(), before.end());
        }
        assert_eq!(
            SetChannelTransform::new(16),
            Err(Error::InvalidFieldRange {
                field: "channel",
                value: 16
            })
        );
    }

    #[test]
    fn transpose() {
        let c_major = KeySignature::default();
        let out = TransposeTransform::new(-3)
            .apply(region(&[60, 64], c_major))
            .unwrap();
        assert_eq!(pitches(&out), vec![57, 61]);
        let out = TransposeTransform::up(Interval::Fifth)
            .apply(region(&[60], c_major))
            .unwrap();
        assert_eq!(pitches(&out), vec![67]);
        let out = TransposeTransform::down(Interval::WHOLE_STEP)
            .apply(region(&[60], c_major))
            .unwrap();
        assert_eq!(pitches(&out), vec![58]);
        assert_eq!(TransposeTransform::up(Interval::HALF_STEP).semitones(), 1);
        assert_eq!(TransposeTransform::down(Interval::Octave).semitones(), -12);
        assert!(TransposeTransform::new(10)
            .apply(region(&[60, 120], c_major))
            .unwrap_err()
            .is_transform());
    }

    #[test]
    fn harmonize_into_fixed_key() {
        let c_major = KeySignature::new(Tonic::C, Scale::Major);
        let d_major = KeySignature::new(Tonic::D, Scale::Major);
        let out = HarmonizerTransform::new(d_major)
            .apply(region(&[60, 64, 67], c_major))
            .unwrap();
        assert_eq!(pitches(&out), vec![62, 66, 69]);
        assert_eq!(out.state().key(), d_major);

        //Relative keys share their pitches
        let a_minor = KeySignature::new(Tonic::A, Scale::Minor);
        let out = HarmonizerTransform::new(c_major)
            .apply(region(&[57, 60], a_minor))
            .unwrap();
        assert_eq!(pitches(&out), vec![57, 60]);
        assert_eq!(out.state().key(), c_major);

        let err = HarmonizerTransform::new(d_major)
            .apply(region(&[127], c_major))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TransformApplication {
                transform: "harmonizer",
                ..
            }
        ));
    }

    #[test]
    fn harmonize_into_live_key() {
        let e_major = KeySignature::new(Tonic::E, Scale::Major);
        let mut lead = MetaMidiStream::new(48, MetaState::default()).unwrap();
        let harmonizer = HarmonizerTransform::new(lead.watch());
        let c_major = KeySignature::default();

        let out = harmonizer.apply(region(&[60], c_major)).unwrap();
        assert_eq!(pitches(&out), vec![60]);

        lead.set_meta_state(MetaState::default().with_key(e_major));
        let out = harmonizer.apply(region(&[60], c_major)).unwrap();
        assert_eq!(pitches(&out), vec![64]);
        assert_eq!(out.state().key(), e_major);
    }

    #[test]
    fn pipeline_runs_in_order() {
        let d_major = KeySignature::new(Tonic::D, Scale::Major);
        let e_major = KeySignature::new(Tonic::E, Scale::Major);
        let pipeline = TransformPipeline::new()
            .with(HarmonizerTransform::new(d_major))
            .with(HarmonizerTransform::new(e_major))
            .with(SetChannelTransform::new(4).unwrap());
        assert_eq!(pipeline.len(), 3);
        let out = pipeline
            .apply(region(&[60], KeySignature::default()))
            .unwrap();
        assert_eq!(pitches(&out), vec![64]);
        assert_eq!(out.notes()[0].note().channel().as_int(), 4);
        assert_eq!(out.state().key(), e_major);

        let empty = TransformPipeline::default();
        assert!(empty.is_empty());
        let input = region(&[60], KeySignature::default());
        assert_eq!(empty.apply(input.clone()).unwrap(), input);
    }

    #[test]
    fn closures_are_transforms() {
        let pipeline = TransformPipeline::new().with(|mut region: Region| -> crate::Result<Region> {
            region.clear();
            Ok(region)
        });
        let out = pipeline
            .apply(region(&[60, 62], KeySignature::default()))
            .unwrap();
        assert!(out.is_empty());
    }
}

mod stream {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::{
        Instrument, KeySignature, MetaMidiStream, MetaState, MidiClock, MidiStream, Scale,
        SetChannelTransform, Tonic, TransposeTransform,
    };
    use std::{cell::RefCell, rc::Rc};

    type Log = Rc<RefCell<Vec<Vec<ChannelMessage>>>>;

    /// An instrument that records every batch it receives.
    fn recorder() -> (Log, impl Instrument) {
        let log: Log = Rc::default();
        let sink = Rc::clone(&log);
        (log, move |batch: &[ChannelMessage]| {
            sink.borrow_mut().push(batch.to_vec())
        })
    }

    fn channel(msg: Message) -> ChannelMessage {
        *msg.as_channel().unwrap()
    }

    #[test]
    fn clock() {
        assert_eq!(
            MidiClock::new(0),
            Err(Error::InvalidFieldRange {
                field: "ticks_per_beat",
                value: 0
            })
        );
        let mut clock = MidiClock::new(48).unwrap();
        assert_eq!(
            clock.advance(-1),
            Err(Error::InvalidFieldRange {
                field: "amount",
                value: -1
            })
        );
        assert_eq!(clock.current_tick(), 0);
        clock.advance(24).unwrap();
        clock.advance(0).unwrap();
        assert_eq!(clock.current_tick(), 24);
        assert_eq!(clock.current_beat(), 0.5);
        assert_eq!(clock.beat_to_tick(1.5), 72);
        assert_eq!(clock.beat_to_tick(0.01), 0);
        assert_eq!(MidiClock::default().ticks_per_beat(), 48);

        let mut clock = MidiClock::default();
        clock.advance(i64::MAX).unwrap();
        assert_eq!(
            clock.advance(1),
            Err(Error::InvalidFieldRange {
                field: "amount",
                value: 1
            })
        );
        assert_eq!(clock.current_tick(), i64::MAX);
    }

    #[test]
    fn meta_state() {
        let state = MetaState::default();
        assert_eq!(state.beats_per_measure(), 4);
        assert_eq!(state.denominator(), 4);
        assert_eq!(state.bpm(), 120.0);
        assert_eq!(state.key(), KeySignature::new(Tonic::C, Scale::Major));
        assert_eq!(
            MetaState::new(4, 3, 120.0, KeySignature::default()),
            Err(Error::InvalidDenominator(3))
        );
        assert_eq!(
            MetaState::new(0, 4, 120.0, KeySignature::default()),
            Err(Error::InvalidFieldRange {
                field: "beats_per_measure",
                value: 0
            })
        );
        assert_eq!(
            MetaState::new(6, 8, 120.0, KeySignature::default())
                .unwrap()
                .subdivision(),
            3
        );
    }

    #[test]
    fn dispatch_whole_buffer() {
        let mut stream = MidiStream::new(48).unwrap();
        let (first, a) = recorder();
        let (second, b) = recorder();
        stream.add_instrument(a);
        stream.add_instrument(b);
        let x = channel(on(note(0, 60, 100), 0));
        let y = channel(off(note(0, 60, 0), 24));

        stream.push_buffer(&[x]);
        stream.push_buffer(&[y]);
        assert_eq!(stream.pending(), &[x, y]);
        assert!(first.borrow().is_empty());

        stream.update();
        assert!(stream.pending().is_empty());
        assert_eq!(*first.borrow(), vec![vec![x, y]]);
        assert_eq!(*second.borrow(), vec![vec![x, y]]);

        stream.update();
        assert_eq!(*first.borrow(), vec![vec![x, y], vec![]]);
    }

    #[test]
    fn remove_instrument() {
        let mut stream = MidiStream::new(48).unwrap();
        let mut other = MidiStream::default();
        let (log, instrument) = recorder();
        let handle = stream.add_instrument(instrument);
        assert_eq!(handle.stream_id(), stream.id());
        assert_ne!(stream.id(), other.id());

        assert!(other.remove_instrument(handle).is_none());
        assert!(stream.remove_instrument(handle).is_some());
        assert!(stream.remove_instrument(handle).is_none());
        assert_eq!(stream.instrument_count(), 0);

        stream.push_buffer(&[channel(on(note(0, 60, 100), 0))]);
        stream.update();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn tracks_sounding_notes() {
        let mut stream = MidiStream::default();
        let a = note(0, 60, 100);
        let b = note(0, 64, 100);
        stream.push_buffer(&[
            channel(on(a, 0)),
            channel(on(b, 0)),
            channel(off(a, 10)),
        ]);
        stream.update();
        assert!(stream.state().is_on(b.pitch()));
        assert!(!stream.state().is_on(a.pitch()));

        stream.push_buffer(&[channel(on(note(0, 64, 0), 10))]);
        stream.update();
        assert!(stream.state().notes_on().is_empty());
    }

    #[test]
    fn transformed_window() {
        let d_major = KeySignature::new(Tonic::D, Scale::Major);
        let mut stream = MetaMidiStream::new(48, MetaState::default()).unwrap();
        let watch = stream.watch();
        let (log, instrument) = recorder();
        stream.stream_mut().add_instrument(instrument);
        stream.add_transform(SetChannelTransform::new(2).unwrap());
        stream.add_transform(crate::HarmonizerTransform::new(d_major));

        let a = note(0, 60, 100);
        stream.push_buffer(&[on(a, 0), off(a, 24)]).unwrap();
        assert_eq!(stream.meta_state().key(), d_major);
        assert_eq!(watch.get().key(), d_major);

        stream.update();
        assert_eq!(
            *log.borrow(),
            vec![vec![
                channel(on(note(2, 62, 100), 0)),
                channel(off(note(2, 62, 100), 24)),
            ]]
        );
    }

    #[test]
    fn repeated_note_stays_on() {
        let mut stream = MetaMidiStream::new(48, MetaState::default()).unwrap();
        let a = note(0, 60, 100);
        stream.push_buffer(&[on(a, 0), off(a, 24), on(a, 0)]).unwrap();
        assert_eq!(
            stream.stream().pending(),
            &[
                channel(on(a, 0)),
                channel(off(a, 24)),
                channel(on(a, 0)),
            ]
        );
        stream.update();
        assert!(stream.stream().state().is_on(a.pitch()));
    }

    #[test]
    fn failed_transform_commits_nothing() {
        let mut stream = MetaMidiStream::new(48, MetaState::default()).unwrap();
        let (log, instrument) = recorder();
        stream.stream_mut().add_instrument(instrument);
        stream.add_transform(crate::HarmonizerTransform::new(KeySignature::new(
            Tonic::B,
            Scale::Major,
        )));
        stream.add_transform(TransposeTransform::new(100));

        let a = note(0, 60, 100);
        let err = stream.push_buffer(&[on(a, 0), off(a, 24)]).unwrap_err();
        assert!(err.is_transform());
        assert_eq!(stream.meta_state(), MetaState::default());
        assert!(stream.stream().pending().is_empty());

        stream.update();
        assert_eq!(*log.borrow(), vec![Vec::<ChannelMessage>::new()]);
    }
}

mod file {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::{
        KeySignature, MetaMidiStream, MetaState, MidiFile, Scale, Tonic, TransposeTransform,
        DEFAULT_BUFFER_SIZE,
    };

    /// `count` notes of one tick each, one after the other.
    fn melody(count: u8) -> Vec<Message> {
        (0..count)
            .flat_map(|i| {
                let n = note(0, 60 + i, 100);
                vec![on(n, 1), off(n, 1)]
            })
            .collect()
    }

    fn file(messages: Vec<Message>, buffer_size: usize) -> MidiFile {
        let stream = MetaMidiStream::new(48, MetaState::default()).unwrap();
        MidiFile::new(messages, buffer_size, stream).unwrap()
    }

    #[test]
    fn windows() {
        let mut file = file(melody(5), 4);
        let mut heads = Vec::new();
        while !file.end_of_file() {
            file.push_next_buffer().unwrap();
            heads.push(file.play_head());
        }
        assert_eq!(heads, vec![4, 8, 10]);
        assert_eq!(file.stream().stream().pending().len(), 10);

        //No-op once the end was reached
        file.push_next_buffer().unwrap();
        assert_eq!(file.play_head(), 10);
        assert_eq!(file.stream().stream().pending().len(), 10);

        file.reset();
        assert_eq!(file.play_head(), 0);
        assert!(!file.end_of_file());
    }

    #[test]
    fn exact_last_window() {
        let mut file = file(melody(4), 4);
        file.push_next_buffer().unwrap();
        assert!(!file.end_of_file());
        file.push_next_buffer().unwrap();
        assert!(file.end_of_file());
        assert_eq!(file.play_head(), 8);

        file.add_message(on(note(0, 72, 100), 1));
        assert!(!file.end_of_file());
        assert_eq!(file.message_count(), 9);
        file.push_next_buffer().unwrap();
        assert_eq!(file.play_head(), 9);
        assert!(file.end_of_file());
    }

    #[test]
    fn zero_buffer_size() {
        let stream = MetaMidiStream::new(48, MetaState::default()).unwrap();
        assert_eq!(
            MidiFile::new(melody(1), 0, stream).unwrap_err(),
            Error::InvalidFieldRange {
                field: "buffer_size",
                value: 0
            }
        );
    }

    #[test]
    fn failed_window_keeps_play_head() {
        let mut file = file(melody(2), DEFAULT_BUFFER_SIZE);
        file.stream_mut()
            .add_transform(TransposeTransform::new(100));
        assert!(file.push_next_buffer().is_err());
        assert_eq!(file.play_head(), 0);
        assert!(!file.end_of_file());
    }

    #[test]
    fn reset_restores_state() {
        let d_major = KeySignature::new(Tonic::D, Scale::Major);
        let mut messages = vec![Message::Meta(MetaMessage::KeySignature {
            key: d_major,
            delta: u28::new(0),
        })];
        messages.extend(melody(1));
        let mut file = file(messages, 8);
        file.push_next_buffer().unwrap();
        assert_eq!(file.stream().meta_state().key(), d_major);
        file.reset();
        assert_eq!(file.stream().meta_state(), MetaState::default());
    }

    #[test]
    fn parse_and_back() {
        let mut body = vec![0x00, 0x90, 60, 100, 0x18, 0x80, 60, 0];
        body.extend_from_slice(&EOT);
        let file = MidiFile::parse(&single_track(&body), DEFAULT_BUFFER_SIZE).unwrap();
        assert_eq!(file.message_count(), 2);
        assert_eq!(
            file.stream().stream().state().clock().ticks_per_beat(),
            48
        );
        let region = file.to_region();
        assert_eq!(region.len(), 1);
        assert_eq!(region.notes()[0].start(), Some(0));
        assert_eq!(region.notes()[0].end(), Some(24));

        let smf = file.to_smf().unwrap();
        assert_eq!(smf.header.format, Format::SingleTrack);
        assert_eq!(smf.to_bytes().unwrap(), single_track(&body));
    }

    #[test]
    fn timecode_falls_back_to_default_ticks() {
        let mut raw = b"MThd\0\0\0\x06\0\0\0\x01\xE7\x28MTrk\0\0\0\x04".to_vec();
        raw.extend_from_slice(&EOT);
        let file = MidiFile::parse(&raw, 4).unwrap();
        assert_eq!(
            file.stream().stream().state().clock().ticks_per_beat(),
            crate::DEFAULT_TICKS_PER_BEAT
        );
        assert_eq!(file.message_count(), 0);
    }
}
