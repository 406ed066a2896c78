//! End-to-end archive replay against a scripted console.
//!
//! These tests drive the public supervisor API over the mock transport,
//! with the script playing the console's whole side of the conversation:
//! wake handshake, dump negotiation, and page serving with re-sends.

use std::time::Duration;

use time::macros::datetime;
use time::PrimitiveDateTime;
use tokio_util::sync::CancellationToken;

use wxlink::console::archive::{pack_date, pack_time};
use wxlink::console::{
    crc, ArchiveRecord, LinkConfig, LinkSupervisor, LiveSample, ACK, ARCHIVE_PAGE_LEN,
    ARCHIVE_RECORDS_PER_PAGE, ARCHIVE_RECORD_LEN, CR, LF, NACK,
};
use wxlink::sink::SampleSink;
use wxlink::transport::{MockState, MockTransport};

fn record_bytes(ts: PrimitiveDateTime) -> [u8; ARCHIVE_RECORD_LEN] {
    let mut raw = [0u8; ARCHIVE_RECORD_LEN];
    raw[0..2].copy_from_slice(&pack_date(ts.date()).to_le_bytes());
    raw[2..4].copy_from_slice(&pack_time(ts.time()).to_le_bytes());
    raw[4..6].copy_from_slice(&655i16.to_le_bytes());
    raw[6..8].copy_from_slice(&670i16.to_le_bytes());
    raw[8..10].copy_from_slice(&641i16.to_le_bytes());
    raw[10..12].copy_from_slice(&2u16.to_le_bytes());
    raw[14..16].copy_from_slice(&29_880u16.to_le_bytes());
    raw[16..18].copy_from_slice(&32_767u16.to_le_bytes());
    raw[20..22].copy_from_slice(&705i16.to_le_bytes());
    raw[22] = 42;
    raw[23] = 63;
    raw[24] = 4;
    raw[25] = 11;
    raw[26] = 2;
    raw[27] = 9;
    raw
}

fn page(sequence: u8, records: &[[u8; ARCHIVE_RECORD_LEN]]) -> Vec<u8> {
    assert_eq!(records.len(), ARCHIVE_RECORDS_PER_PAGE);
    let mut buf = vec![sequence];
    for record in records {
        buf.extend_from_slice(record);
    }
    crc::append(&mut buf);
    assert_eq!(buf.len(), ARCHIVE_PAGE_LEN);
    buf
}

fn dump_header(pages: u16, first_offset: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(6);
    buf.extend_from_slice(&pages.to_le_bytes());
    buf.extend_from_slice(&first_offset.to_le_bytes());
    crc::append(&mut buf);
    buf
}

/// Script the console's side: wake replies, dump negotiation, page serving.
fn console_script(
    pages: Vec<Vec<u8>>,
    first_offset: u16,
) -> impl FnMut(&[u8], &mut MockState) + Send + 'static {
    let mut next_page = 0usize;
    move |written, state| {
        if written == [LF] {
            state.queue(&[LF, CR]);
        } else if written.starts_with(b"DMPAFT") {
            next_page = 0;
            state.queue(&[ACK]);
        } else if written.len() == 6 && crc::is_valid(written) {
            state.queue(&[ACK]);
            state.queue(&dump_header(pages.len() as u16, first_offset));
        } else if written == [ACK] {
            if next_page < pages.len() {
                state.queue(&pages[next_page]);
                next_page += 1;
            }
        } else if written == [NACK] && next_page > 0 {
            state.queue(&pages[next_page - 1]);
        }
    }
}

#[derive(Default)]
struct EventSink {
    records: Vec<(PrimitiveDateTime, u16)>,
    events: Vec<String>,
}

impl SampleSink for EventSink {
    fn on_live_sample(&mut self, _sample: &LiveSample) {
        self.events.push("live".to_string());
    }
    fn on_archive_record(&mut self, record: &ArchiveRecord, interval_minutes: u16) {
        self.records.push((record.timestamp, interval_minutes));
        self.events.push(format!("record {}", record.timestamp));
    }
    fn on_day_rollover(&mut self, at: PrimitiveDateTime) {
        self.events.push(format!("rollover {at}"));
    }
    fn on_midnight_reset(&mut self, at: PrimitiveDateTime) {
        self.events.push(format!("midnight {at}"));
    }
}

fn test_config() -> LinkConfig {
    LinkConfig {
        logger_interval_minutes: 30,
        rollover_hour: 9,
        ack_timeout: Duration::from_millis(50),
        frame_timeout: Duration::from_millis(50),
        page_timeout: Duration::from_millis(50),
        reconnect_cooldown: Duration::ZERO,
        ..LinkConfig::default()
    }
}

#[tokio::test]
async fn replay_wakes_negotiates_and_emits_history_in_order() {
    let mut page0: Vec<[u8; ARCHIVE_RECORD_LEN]> = vec![
        record_bytes(datetime!(2024-06-01 11:45)),
        record_bytes(datetime!(2024-06-01 11:50)),
        record_bytes(datetime!(2024-06-01 11:55)),
    ];
    page0.push(record_bytes(datetime!(2024-06-01 12:05)));
    page0.push(record_bytes(datetime!(2024-06-01 12:10)));
    let page1: Vec<[u8; ARCHIVE_RECORD_LEN]> = (0..5)
        .map(|i| record_bytes(datetime!(2024-06-01 12:15) + time::Duration::minutes(5 * i)))
        .collect();

    let transport =
        MockTransport::new().with_responder(console_script(vec![page(1, &page0), page(2, &page1)], 3));
    let handle = transport.handle();
    let supervisor = LinkSupervisor::new(Box::new(transport), test_config());

    let mut sink = EventSink::default();
    let emitted = supervisor
        .replay_archive(
            datetime!(2024-06-01 12:00),
            &mut sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(emitted, 7);
    let timestamps: Vec<_> = sink.records.iter().map(|(ts, _)| *ts).collect();
    let mut sorted = timestamps.clone();
    sorted.sort();
    assert_eq!(timestamps, sorted);
    assert_eq!(timestamps[0], datetime!(2024-06-01 12:05));
    assert_eq!(timestamps[6], datetime!(2024-06-01 12:35));

    // First record carries the configured logger interval, the rest the
    // gap to their predecessor.
    assert_eq!(sink.records[0].1, 30);
    assert!(sink.records[1..].iter().all(|(_, i)| *i == 5));

    let state = handle.lock().unwrap();
    assert_eq!(state.written[0], LF, "wake precedes the dump command");
}

#[tokio::test]
async fn restarting_an_interrupted_replay_emits_nothing_twice() {
    let records: Vec<[u8; ARCHIVE_RECORD_LEN]> = (0..5)
        .map(|i| record_bytes(datetime!(2024-06-01 12:05) + time::Duration::minutes(5 * i)))
        .collect();
    let transport = MockTransport::new().with_responder(console_script(vec![page(1, &records)], 0));
    let supervisor = LinkSupervisor::new(Box::new(transport), test_config());
    let stop = CancellationToken::new();

    let mut sink = EventSink::default();
    let first = supervisor
        .replay_archive(datetime!(2024-06-01 12:00), &mut sink, &stop)
        .await
        .unwrap();
    assert_eq!(first, 5);

    // Restart from the last accepted record; the console re-serves the
    // same page.
    let resume = sink.records.last().unwrap().0;
    let second = supervisor.replay_archive(resume, &mut sink, &stop).await.unwrap();
    assert_eq!(second, 0);
    assert_eq!(sink.records.len(), 5);
}

#[tokio::test]
async fn rollover_hook_fires_before_the_boundary_record() {
    let records: Vec<[u8; ARCHIVE_RECORD_LEN]> = [
        datetime!(2024-06-01 08:50),
        datetime!(2024-06-01 08:55),
        datetime!(2024-06-01 09:00),
        datetime!(2024-06-01 09:05),
        datetime!(2024-06-01 09:10),
    ]
    .iter()
    .map(|ts| record_bytes(*ts))
    .collect();
    let transport = MockTransport::new().with_responder(console_script(vec![page(1, &records)], 0));
    let supervisor = LinkSupervisor::new(Box::new(transport), test_config());

    let mut sink = EventSink::default();
    supervisor
        .replay_archive(
            datetime!(2024-06-01 08:45),
            &mut sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let rollover = sink
        .events
        .iter()
        .position(|e| e.starts_with("rollover"))
        .expect("rollover fired");
    let boundary_record = sink
        .events
        .iter()
        .position(|e| e.starts_with("record") && e.contains("2024-06-01 9:00"))
        .expect("boundary record emitted");
    assert!(rollover < boundary_record);
    assert_eq!(
        sink.events.iter().filter(|e| e.starts_with("rollover")).count(),
        1
    );
    assert!(sink.events.iter().all(|e| !e.starts_with("midnight")));
}
