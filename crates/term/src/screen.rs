// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use harness_core::json::sha256_digest;
use serde::{Deserialize, Serialize};

/// Deterministic VT screen grid, the Snapshot Oracle.
/// Wraps `avt::Vt`, which owns the primary/alternate buffers, cursor
/// position, and CSI/OSC parsing; this type layers on alt-screen tracking
/// (avt does not expose which buffer is active) and cross-`feed()` UTF-8
/// and escape-sequence buffering.
pub struct Screen {
    vt: avt::Vt,
    seq: u64,
    changed: bool,
    alt_screen: bool,
    cursor_visible: bool,
    /// Buffer for incomplete UTF-8 trailing bytes between `feed()` calls.
    utf8_buf: [u8; 3],
    utf8_buf_len: u8,
    /// Buffer for trailing bytes that may form an incomplete escape
    /// sequence across `feed()` calls (max tracked sequence length is 8:
    /// `\x1b[?1049h`).
    esc_buf: [u8; 7],
    esc_buf_len: u8,
}

impl std::fmt::Debug for Screen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Screen")
            .field("seq", &self.seq)
            .field("changed", &self.changed)
            .field("alt_screen", &self.alt_screen)
            .field("cursor_visible", &self.cursor_visible)
            .finish()
    }
}

/// DECSET alternate screen buffer enable.
const ALT_SCREEN_ON: &[u8] = b"\x1b[?1049h";
/// DECRST alternate screen buffer disable.
const ALT_SCREEN_OFF: &[u8] = b"\x1b[?1049l";
/// DECTCEM cursor visible.
const CURSOR_SHOW: &[u8] = b"\x1b[?25h";
/// DECTCEM cursor hidden.
const CURSOR_HIDE: &[u8] = b"\x1b[?25l";

/// Scan `data` for the on/off byte patterns of a DEC private mode, updating
/// `flag` when either is found.
fn scan_private_mode(data: &[u8], on: &[u8], off: &[u8], flag: &mut bool) {
    if data.len() >= on.len() && data.windows(on.len()).any(|w| w == on) {
        *flag = true;
    }
    if data.len() >= off.len() && data.windows(off.len()).any(|w| w == off) {
        *flag = false;
    }
}

/// Returns the number of trailing bytes that form an incomplete UTF-8 sequence.
///
/// Scans backwards from the end of `data` looking for a leading byte whose
/// expected sequence length exceeds the bytes available. Returns 0 when the
/// tail is complete (or pure ASCII).
fn incomplete_utf8_tail_len(data: &[u8]) -> usize {
    let len = data.len();
    for i in 1..=len.min(3) {
        let byte = data[len - i];
        if byte < 0x80 {
            return 0;
        }
        if byte >= 0xC0 {
            let expected = if byte < 0xE0 {
                2
            } else if byte < 0xF0 {
                3
            } else {
                4
            };
            return if i < expected { i } else { 0 };
        }
    }
    0
}

impl Screen {
    /// Create a new screen with the given dimensions.
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            vt: avt::Vt::new(cols as usize, rows as usize),
            seq: 0,
            changed: false,
            alt_screen: false,
            cursor_visible: true,
            utf8_buf: [0; 3],
            utf8_buf_len: 0,
            esc_buf: [0; 7],
            esc_buf_len: 0,
        }
    }

    /// Feed raw bytes from the PTY into the virtual terminal.
    pub fn feed(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let buf_len = self.utf8_buf_len as usize;
        let owned: Vec<u8>;
        let input = if buf_len == 0 {
            data
        } else {
            owned = [&self.utf8_buf[..buf_len], data].concat();
            self.utf8_buf_len = 0;
            &owned
        };

        // Track alt-screen and cursor-visibility transitions from raw
        // escape sequences since avt::Vt doesn't expose either directly.
        //
        // To detect sequences split across PTY read boundaries, bridge the
        // esc_buf tail from the previous call with the start of `input`,
        // scan that combined region, then also scan the full input.
        // Finally, buffer the last 7 bytes for next time.
        let esc_len = self.esc_buf_len as usize;
        if esc_len > 0 {
            let take = input.len().min(ALT_SCREEN_ON.len());
            let mut bridge = [0u8; 15]; // 7 + 8
            bridge[..esc_len].copy_from_slice(&self.esc_buf[..esc_len]);
            bridge[esc_len..esc_len + take].copy_from_slice(&input[..take]);
            let region = &bridge[..esc_len + take];
            scan_private_mode(region, ALT_SCREEN_ON, ALT_SCREEN_OFF, &mut self.alt_screen);
            scan_private_mode(region, CURSOR_SHOW, CURSOR_HIDE, &mut self.cursor_visible);
        }
        scan_private_mode(input, ALT_SCREEN_ON, ALT_SCREEN_OFF, &mut self.alt_screen);
        scan_private_mode(input, CURSOR_SHOW, CURSOR_HIDE, &mut self.cursor_visible);

        let tail_len = input.len().min(7);
        self.esc_buf[..tail_len].copy_from_slice(&input[input.len() - tail_len..]);
        self.esc_buf_len = tail_len as u8;

        let tail = incomplete_utf8_tail_len(input);
        let (to_feed, to_buffer) = input.split_at(input.len() - tail);

        if !to_buffer.is_empty() {
            self.utf8_buf[..to_buffer.len()].copy_from_slice(to_buffer);
            self.utf8_buf_len = to_buffer.len() as u8;
        }

        if !to_feed.is_empty() {
            let s = String::from_utf8_lossy(to_feed);
            let _ = self.vt.feed_str(&s);
        }

        self.seq += 1;
        self.changed = true;
    }

    /// Capture a point-in-time snapshot of the screen contents.
    pub fn snapshot(&self) -> ScreenSnapshot {
        let (cols, rows) = self.vt.size();
        let cursor = self.vt.cursor();
        let lines: Vec<String> = self
            .vt
            .view()
            .map(|line| line.text().trim_end().to_string())
            .collect();

        let cursor_position = CursorPosition {
            row: cursor.row as u16,
            col: cursor.col as u16,
            visible: self.cursor_visible,
        };

        let frame_hash = frame_hash(&lines, cols as u16, rows as u16, self.alt_screen, &cursor_position);

        ScreenSnapshot {
            lines,
            cols: cols as u16,
            rows: rows as u16,
            active_screen: if self.alt_screen { ActiveScreen::Alternate } else { ActiveScreen::Primary },
            cursor: cursor_position,
            sequence: self.seq,
            frame_hash,
        }
    }

    pub fn is_alt_screen(&self) -> bool {
        self.alt_screen
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn clear_changed(&mut self) {
        self.changed = false;
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Resize the virtual terminal. `avt` preserves the overlap of existing
    /// cells at the top-left and clamps the cursor into the new extent.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let _ = self.vt.resize(cols as usize, rows as usize);
    }
}

/// Deterministic digest of everything in a snapshot except the digest
/// itself ("the hashless frame serialization"), so `frameHash` is a pure
/// function of the ingested byte prefix and resize sequence.
fn frame_hash(lines: &[String], cols: u16, rows: u16, alt_screen: bool, cursor: &CursorPosition) -> String {
    let serialized = serde_json::json!({
        "lines": lines,
        "cols": cols,
        "rows": rows,
        "activeScreen": alt_screen,
        "cursor": { "row": cursor.row, "col": cursor.col, "visible": cursor.visible },
    })
    .to_string();
    sha256_digest(&[&serialized])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveScreen {
    Primary,
    Alternate,
}

/// Point-in-time capture of the terminal screen contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenSnapshot {
    pub lines: Vec<String>,
    pub cols: u16,
    pub rows: u16,
    #[serde(rename = "activeScreen")]
    pub active_screen: ActiveScreen,
    pub cursor: CursorPosition,
    pub sequence: u64,
    #[serde(rename = "frameHash")]
    pub frame_hash: String,
}

/// Row and column position of the terminal cursor, plus visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub row: u16,
    pub col: u16,
    pub visible: bool,
}

#[cfg(test)]
#[path = "screen_tests.rs"]
mod tests;
