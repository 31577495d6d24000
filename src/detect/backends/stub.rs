use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{RawDetections, PERSON_CLASS_ID};

const DEFAULT_SCRIPT: &[usize] = &[2, 4, 7, 11, 13, 8, 3];
const DEFAULT_INPUT: (u32, u32) = (300, 300);

/// Stub backend for tests and `stub://` runs. Emits a scripted crowd size per
/// call, cycling through the script.
///
/// Each call also emits one low-confidence person and one non-person box so
/// the analyzer's filtering is exercised end to end.
pub struct StubBackend {
    script: Vec<usize>,
    input_shape: (u32, u32),
    calls: usize,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            script: DEFAULT_SCRIPT.to_vec(),
            input_shape: DEFAULT_INPUT,
            calls: 0,
        }
    }

    /// Replace the crowd-size script. An empty script always yields zero people.
    pub fn with_script(mut self, script: Vec<usize>) -> Self {
        self.script = script;
        self
    }

    pub fn with_input_shape(mut self, width: u32, height: u32) -> Self {
        self.input_shape = (width, height);
        self
    }

    /// Number of `detect` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls
    }

    fn people_for_call(&self, call: usize) -> usize {
        if self.script.is_empty() {
            0
        } else {
            self.script[call % self.script.len()]
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_shape(&self) -> (u32, u32) {
        self.input_shape
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<RawDetections> {
        if (width, height) != self.input_shape {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                width,
                height,
                self.input_shape.0,
                self.input_shape.1
            ));
        }
        if pixels.is_empty() {
            return Err(anyhow!("empty frame"));
        }

        let people = self.people_for_call(self.calls);
        self.calls += 1;

        let mut out = RawDetections::default();
        for i in 0..people {
            out.push(grid_box(i), PERSON_CLASS_ID as f32, 0.9);
        }
        // Below the confidence cut.
        out.push([0.0, 0.0, 0.05, 0.05], PERSON_CLASS_ID as f32, 0.3);
        // Not a person.
        out.push([0.9, 0.9, 1.0, 1.0], 2.0, 0.8);
        Ok(out)
    }
}

/// Lay boxes out on an 8x8 grid so every index gets a distinct region.
fn grid_box(index: usize) -> [f32; 4] {
    let cell = 1.0 / 8.0;
    let row = (index / 8 % 8) as f32;
    let col = (index % 8) as f32;
    [row * cell, col * cell, (row + 1.0) * cell, (col + 1.0) * cell]
}
