//! Fuzz target: configuration import
//!
//! Drives arbitrary bytes through the configuration upload handler and
//! the per-component option importer, verifying:
//! - No panics under arbitrary input
//! - Chunked delivery never accepts more than the declared size
//! - A rejected archive queues no imports
//! - An import stops at the first failing option
//!
//! cargo fuzz run fuzz_settings_import

#![no_main]

use libfuzzer_sys::fuzz_target;
use modhub::component::{Request, RequestQueue};
use modhub::dispatch;
use modhub::error::Outcome;
use modhub::upload::{self, ACTION_CONFIG};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // First byte picks the chunk size, the rest is the archive.
    let chunk = usize::from(data[0] % 32) + 1;
    let archive = &data[1..];

    let queue = RequestQueue::new();
    let Ok(mut handler) = upload::begin(ACTION_CONFIG, archive.len(), &queue) else {
        return;
    };
    for block in archive.chunks(chunk) {
        handler.block(block).expect("block within declared size rejected");
    }
    assert!(handler.block(b"x").is_err(), "overflow accepted");

    match handler.end(true) {
        Ok(_) => {
            while let Some(request) = queue.pop() {
                let Request::Import { data, .. } = request else {
                    panic!("config upload queued a non-import request");
                };
                // Options starting with an underscore fail; nothing after
                // the first failure may be handled.
                let mut failed = false;
                let outcome = dispatch::import_options(&data, |key, _value, _action| {
                    assert!(!failed, "option handled after a failure");
                    if key.starts_with('_') {
                        failed = true;
                        Outcome::invalid_value()
                    } else {
                        Outcome::ok("")
                    }
                });
                if failed {
                    assert!(outcome.is_error());
                }
            }
        }
        Err(_) => assert!(queue.is_empty(), "rejected archive queued imports"),
    }
});
