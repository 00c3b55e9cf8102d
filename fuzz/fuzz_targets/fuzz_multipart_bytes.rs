#![no_main]

use formpipe::{Callbacks, Constraints, MultipartParser};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The first byte picks a chunk size so boundary splits land everywhere.
    let (chunk_size, body) = match data.split_first() {
        Some((&n, rest)) => (usize::from(n).max(1), rest),
        None => return,
    };

    let mut callbacks = Callbacks::new();
    callbacks.set(formpipe::Event::PartData, |payload| {
        let _ = payload.data();
        Ok(())
    });

    let mut parser = match MultipartParser::new("X-BOUNDARY", Constraints::new(), callbacks) {
        Ok(parser) => parser,
        Err(_) => return,
    };

    for chunk in body.chunks(chunk_size) {
        if parser.write(chunk).is_err() {
            return;
        }
    }
    let _ = parser.finalize();
});
