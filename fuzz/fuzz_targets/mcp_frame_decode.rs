#![no_main]

use libfuzzer_sys::fuzz_target;
use sidekick_tools::{decode_mcp_frame, McpFrameError};

fuzz_target!(|data: &[u8]| {
    let mut rest = data;
    loop {
        match decode_mcp_frame(rest, true) {
            Ok(Some((_, consumed))) | Err(McpFrameError::InvalidJson { consumed, .. }) => {
                assert!(consumed > 0 && consumed <= rest.len());
                rest = &rest[consumed..];
            }
            Ok(None) | Err(_) => break,
        }
    }
});
