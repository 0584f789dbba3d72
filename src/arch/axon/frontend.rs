//! Protocol front-end: framed command parser and payload forwarder.
//!
//! A frame is 6 header words followed by `addr_count * bank_span` payload
//! words, the final payload word carrying the end-of-frame marker. The
//! parser accepts one header word per cycle whenever the upstream presents
//! one; in the payload phase it is pure pass-through with upstream-ready
//! equal to downstream-ready. Malformed frames are consumed, not rejected:
//! a bad magic raises the sticky per-frame error flag and parsing goes on.

use log::warn;

use super::params::{CMD_MAGIC, HEADER_LEN, StreamWord, Word};

/// The six decoded header fields, valid only on the `header_valid` cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedCommand {
  pub code: u8,
  pub bank_start: u8,
  pub bank_end: u8,
  pub addr_start: u16,
  pub addr_count: u16,
  /// True when the frame's magic word did not match.
  pub magic_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
  Header(u8), // 0..=5
  DataPass,
}

/// One-cycle outputs of the parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrontendOutput {
  /// Input word was accepted this cycle.
  pub consumed: bool,
  /// Pulse carrying the decoded command, exactly once per frame.
  pub header_valid: Option<ParsedCommand>,
  /// Payload word forwarded downstream this cycle.
  pub payload: Option<StreamWord>,
}

#[derive(Debug, Clone)]
pub struct FrameParser {
  state: ParserState,
  fields: [Word; HEADER_LEN],
  magic_error: bool,
}

impl FrameParser {
  pub fn new() -> Self {
    Self {
      state: ParserState::Header(0),
      fields: [0; HEADER_LEN],
      magic_error: false,
    }
  }

  pub fn reset(&mut self) {
    self.state = ParserState::Header(0);
    self.fields = [0; HEADER_LEN];
    self.magic_error = false;
  }

  /// Sticky error flag for the frame currently in flight.
  pub fn magic_error(&self) -> bool {
    self.magic_error
  }

  /// Advance one cycle. `downstream_ready` gates payload forwarding only;
  /// header words are always accepted.
  pub fn tick(&mut self, input: Option<StreamWord>, downstream_ready: bool) -> FrontendOutput {
    let mut out = FrontendOutput::default();
    let word = match input {
      Some(w) => w,
      None => return out,
    };

    match self.state {
      ParserState::Header(idx) => {
        out.consumed = true;
        self.fields[idx as usize] = word.data;

        if idx == 0 {
          // Magic check clears the previous frame's sticky flag
          self.magic_error = word.data != CMD_MAGIC;
          if self.magic_error {
            warn!("frame magic mismatch: got {:#06x}, expected {:#06x}", word.data, CMD_MAGIC);
          }
        }

        if idx as usize == HEADER_LEN - 1 {
          out.header_valid = Some(self.decode());
          self.state = ParserState::DataPass;
        } else {
          self.state = ParserState::Header(idx + 1);
        }
      }
      ParserState::DataPass => {
        if downstream_ready {
          out.consumed = true;
          out.payload = Some(word);
          if word.last {
            self.state = ParserState::Header(0);
          }
        }
      }
    }

    out
  }

  fn decode(&self) -> ParsedCommand {
    ParsedCommand {
      code: (self.fields[1] & 0xFF) as u8,
      bank_start: (self.fields[2] & 0x1F) as u8,
      bank_end: (self.fields[3] & 0x1F) as u8,
      addr_start: self.fields[4],
      addr_count: self.fields[5],
      magic_error: self.magic_error,
    }
  }
}

impl Default for FrameParser {
  fn default() -> Self {
    Self::new()
  }
}

/// Build the word stream for one command frame (the host side of the
/// transport). The payload is marked with the end-of-frame flag on its
/// final word; an empty payload gets a single dummy word to keep the
/// frame shape.
pub fn encode_frame(
  code: u8,
  bank_start: u8,
  bank_end: u8,
  addr_start: u16,
  addr_count: u16,
  payload: &[Word],
) -> Vec<StreamWord> {
  let mut words = vec![
    StreamWord::new(CMD_MAGIC),
    StreamWord::new(code as Word),
    StreamWord::new(bank_start as Word),
    StreamWord::new(bank_end as Word),
    StreamWord::new(addr_start),
    StreamWord::new(addr_count),
  ];
  if payload.is_empty() {
    words.push(StreamWord::last(0));
  } else {
    for (i, &p) in payload.iter().enumerate() {
      if i == payload.len() - 1 {
        words.push(StreamWord::last(p));
      } else {
        words.push(StreamWord::new(p));
      }
    }
  }
  words
}
