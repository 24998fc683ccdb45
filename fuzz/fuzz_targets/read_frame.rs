#![no_main]

use dap_client::codec::{decode, read_frame, FrameError};
use libfuzzer_sys::fuzz_target;

const MAX_FRAMES: usize = 16;

fuzz_target!(|data: &[u8]| {
    let Ok(runtime) = tokio::runtime::Builder::new_current_thread().build() else {
        return;
    };
    runtime.block_on(async {
        let mut reader = data;
        for _ in 0..MAX_FRAMES {
            match read_frame(&mut reader).await {
                Ok(Some(payload)) => {
                    let _ = decode(&payload);
                }
                Err(FrameError::Protocol(_)) => {}
                Ok(None) | Err(FrameError::Io(_)) => break,
            }
        }
    });
});
