//! Fuzz harness for the pipe record decoders.
//!
//! Feeds arbitrary bytes to `HandleQuery::decode` and `HandleInfo::decode`,
//! checking that requests re-encode to the same bytes and that malformed
//! responses are rejected without panicking.

#![no_main]
use handlename_core::protocol::{HandleInfo, HandleQuery, REQUEST_LEN, RESPONSE_LEN};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some(record) = data.get(..REQUEST_LEN) {
        let record: &[u8; REQUEST_LEN] = record.try_into().unwrap();
        assert_eq!(&HandleQuery::decode(record).encode(), record);
    }

    if let Some(record) = data.get(..RESPONSE_LEN) {
        let record: &[u8; RESPONSE_LEN] = record.try_into().unwrap();
        if let Ok(info) = HandleInfo::decode(record) {
            let _ = info.name();
            let _ = info.payload();
        }
    }
});
