// Shared test helpers: regular files standing in for raw device nodes.
// Not every integration test uses every helper.
#![allow(dead_code)]

use std::io::Write;
use tempfile::NamedTempFile;
use xhdd::procedure::{Progress, Report};
use xhdd::{Device, Renderer};

/// Create a backing file of `sectors` 512-byte sectors filled with `fill`,
/// and a Device describing it.
pub fn mock_device(sectors: u64, fill: u8) -> (NamedTempFile, Device) {
    let mut temp = NamedTempFile::new().expect("create temp device");
    temp.write_all(&vec![fill; (sectors * 512) as usize])
        .expect("fill temp device");
    temp.flush().expect("flush temp device");
    let dev = Device {
        path: temp.path().to_path_buf(),
        capacity: sectors * 512,
        sector_size: 512,
        ata_capable: true,
        mounted: false,
        model: "MOCKDISK".into(),
    };
    (temp, dev)
}

/// Renderer that records every push and can flip a cancellation token after
/// a fixed number of iterations.
#[derive(Default)]
pub struct RecordingRenderer {
    pub reports: Vec<(Progress, Report)>,
    pub cancel_after: Option<(usize, xhdd::CancelToken)>,
}

impl Renderer for RecordingRenderer {
    fn render(&mut self, progress: &Progress, report: &Report) {
        self.reports.push((*progress, *report));
        if let Some((after, token)) = &self.cancel_after {
            if self.reports.len() >= *after {
                token.cancel();
            }
        }
    }
}
