//! Continuity-counter healing for MPEG-TS segments.
//!
//! A restart-induced encoder reset makes every rewritten segment's
//! continuity counters start back at 0 per PID, which most HLS players
//! tolerate badly at a segment boundary. This optional post-processor
//! rewrites each segment's CC values to continue from the previous
//! segment's final value per PID. Best-effort and swallow-everything: a
//! malformed or unreadable segment is served untouched rather than failing
//! the request.
//!
//! `.m4s` (fragmented MP4) segments are never passed to this processor:
//! continuity counters are an MPEG-TS concept.

use std::path::Path;

use dashmap::DashMap;
use tracing::warn;

use crate::session::types::SessionKey;

const PACKET_SIZE: usize = 188;
const SYNC_BYTE: u8 = 0x47;
const PAT_PID: u16 = 0;

#[derive(Default, Clone)]
struct PidCcState {
    final_cc: u8,
}

/// Per-`(videoId, label)` continuity-counter state, carried across segments.
#[derive(Default)]
pub struct PostProcessor {
    state: DashMap<SessionKey, DashMap<u16, PidCcState>>,
    /// PMT PID discovered from each key's PAT, so it can be excluded from
    /// rewriting like PID 0 even though it isn't a fixed well-known PID.
    pmt_pids: DashMap<SessionKey, u16>,
}

impl PostProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite `path` in place if prior CC state exists for `(video_id,
    /// label)`, or seed that state from `path` if this is the first
    /// segment seen for the key. Errors are logged and swallowed; the
    /// caller always gets a usable segment file either way.
    pub fn process(&self, video_id: &str, label: &str, segment_index: u32, path: &Path) {
        if let Err(e) = self.try_process(video_id, label, segment_index, path) {
            warn!(video_id, label, segment_index, error = %e, "continuity-counter postprocessing failed, serving segment unmodified");
        }
    }

    fn try_process(&self, video_id: &str, label: &str, segment_index: u32, path: &Path) -> std::io::Result<()> {
        let key: SessionKey = (video_id.to_string(), label.to_string());
        let has_prior_state = self.state.contains_key(&key);

        let bytes = std::fs::read(path)?;
        if bytes.is_empty() || bytes.len() % PACKET_SIZE != 0 {
            return Ok(());
        }

        if let Some(pmt_pid) = parse_pmt_pid(&bytes) {
            self.pmt_pids.insert(key.clone(), pmt_pid);
        }

        if segment_index == 0 || !has_prior_state {
            let finals = scan_final_cc_per_pid(&bytes);
            let pid_map = DashMap::new();
            for (pid, cc) in finals {
                pid_map.insert(pid, PidCcState { final_cc: cc });
            }
            self.state.insert(key, pid_map);
            return Ok(());
        }

        let previous = self.state.get(&key).unwrap();
        let pmt_pid = self.pmt_pids.get(&key).map(|r| *r);
        let mut first_seen_in_segment: std::collections::HashMap<u16, u8> = std::collections::HashMap::new();
        let mut rewritten_final: std::collections::HashMap<u16, u8> = std::collections::HashMap::new();
        let mut out = bytes.clone();

        for chunk in out.chunks_mut(PACKET_SIZE) {
            if chunk[0] != SYNC_BYTE {
                continue;
            }
            let pid = packet_pid(chunk);
            if pid == PAT_PID || Some(pid) == pmt_pid {
                continue;
            }
            let Some(prev_state) = previous.get(&pid) else {
                continue;
            };
            let prev_final = prev_state.final_cc;
            let current_cc = chunk[3] & 0x0F;

            let new_cc = match first_seen_in_segment.get(&pid) {
                None => {
                    first_seen_in_segment.insert(pid, current_cc);
                    (prev_final + 1) % 16
                }
                Some(&first_cc) => {
                    let delta = (current_cc as i16 - first_cc as i16).rem_euclid(16) as u8;
                    (prev_final + 1 + delta) % 16
                }
            };

            chunk[3] = (chunk[3] & 0xF0) | (new_cc & 0x0F);
            rewritten_final.insert(pid, new_cc);
        }
        drop(previous);

        let tmp_path = path.with_extension("cc.tmp");
        std::fs::write(&tmp_path, &out)?;
        if std::fs::rename(&tmp_path, path).is_err() {
            let _ = std::fs::remove_file(&tmp_path);
            return Ok(());
        }

        if let Some(mut entry) = self.state.get_mut(&key) {
            for (pid, cc) in rewritten_final {
                entry.insert(pid, PidCcState { final_cc: cc });
            }
        }

        Ok(())
    }
}

fn packet_pid(packet: &[u8]) -> u16 {
    (((packet[1] & 0x1F) as u16) << 8) | packet[2] as u16
}

/// Extract the PMT PID carried in a PAT section, so the rewrite loop can pass
/// PMT packets through unchanged alongside PID 0 (spec.md §4.9 step 2).
/// Assumes a single-program PAT, which is all a JIT-transcoded segment ever
/// produces; returns the first program's PID if found.
fn parse_pmt_pid(bytes: &[u8]) -> Option<u16> {
    for chunk in bytes.chunks(PACKET_SIZE) {
        if chunk.len() < PACKET_SIZE || chunk[0] != SYNC_BYTE {
            continue;
        }
        if packet_pid(chunk) != PAT_PID || chunk[1] & 0x40 == 0 {
            continue;
        }

        let adaptation_field_control = (chunk[3] >> 4) & 0x3;
        let mut offset = 4;
        if adaptation_field_control == 0b10 || adaptation_field_control == 0b11 {
            let adaptation_len = chunk[offset] as usize;
            offset += 1 + adaptation_len;
        }
        if offset >= chunk.len() {
            continue;
        }

        let pointer_field = chunk[offset] as usize;
        offset += 1 + pointer_field;
        if offset + 8 > chunk.len() || chunk[offset] != 0x00 {
            continue;
        }

        let section_length = (((chunk[offset + 1] & 0x0F) as usize) << 8) | chunk[offset + 2] as usize;
        let section_end = (offset + 3 + section_length).min(chunk.len());
        let programs_end = section_end.saturating_sub(4);
        let mut p = offset + 8;
        while p + 4 <= programs_end {
            let program_number = ((chunk[p] as u16) << 8) | chunk[p + 1] as u16;
            let pid = (((chunk[p + 2] & 0x1F) as u16) << 8) | chunk[p + 3] as u16;
            if program_number != 0 {
                return Some(pid);
            }
            p += 4;
        }
    }
    None
}

/// Final (last-observed) continuity-counter value per PID across the whole
/// file, in first-seen PID order.
fn scan_final_cc_per_pid(bytes: &[u8]) -> Vec<(u16, u8)> {
    let mut order = Vec::new();
    let mut finals: std::collections::HashMap<u16, u8> = std::collections::HashMap::new();
    for chunk in bytes.chunks(PACKET_SIZE) {
        if chunk.len() < 4 || chunk[0] != SYNC_BYTE {
            continue;
        }
        let pid = packet_pid(chunk);
        let cc = chunk[3] & 0x0F;
        if !finals.contains_key(&pid) {
            order.push(pid);
        }
        finals.insert(pid, cc);
    }
    order.into_iter().map(|pid| (pid, finals[&pid])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(pid: u16, cc: u8) -> [u8; PACKET_SIZE] {
        let mut p = [0xFFu8; PACKET_SIZE];
        p[0] = SYNC_BYTE;
        p[1] = ((pid >> 8) as u8) & 0x1F;
        p[2] = (pid & 0xFF) as u8;
        p[3] = 0x10 | (cc & 0x0F);
        p
    }

    /// A minimal single-program PAT packet naming `pmt_pid` as the PMT PID.
    fn pat_packet(pmt_pid: u16, cc: u8) -> [u8; PACKET_SIZE] {
        let mut p = [0xFFu8; PACKET_SIZE];
        p[0] = SYNC_BYTE;
        p[1] = 0x40; // payload_unit_start_indicator, PID = 0
        p[2] = 0x00;
        p[3] = 0x10 | (cc & 0x0F); // no adaptation field, payload only
        let section_length: u16 = 13; // tsid(2) + misc(2) + program entry(4) + CRC(4)
        let payload: [u8; 17] = [
            0x00, // pointer_field
            0x00, // table_id: PAT
            0xB0 | (((section_length >> 8) & 0x0F) as u8),
            (section_length & 0xFF) as u8,
            0x00,
            0x01, // transport_stream_id
            0xC1, // reserved/version/current_next
            0x00, // section_number
            0x00, // last_section_number
            0x00,
            0x01, // program_number = 1
            0xE0 | (((pmt_pid >> 8) & 0x1F) as u8),
            (pmt_pid & 0xFF) as u8,
            0,
            0,
            0,
            0, // CRC32 (unchecked by the parser)
        ];
        p[4..4 + payload.len()].copy_from_slice(&payload);
        p
    }

    fn write_segment(dir: &Path, name: &str, packets: &[[u8; PACKET_SIZE]]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut bytes = Vec::new();
        for p in packets {
            bytes.extend_from_slice(p);
        }
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn first_segment_seeds_state_without_rewriting() {
        let dir = tempfile::tempdir().unwrap();
        let packets = [packet(0, 0), packet(256, 5), packet(256, 6)];
        let path = write_segment(dir.path(), "000.ts", &packets);
        let original = std::fs::read(&path).unwrap();

        let pp = PostProcessor::new();
        pp.process("v1", "1080p", 0, &path);

        assert_eq!(std::fs::read(&path).unwrap(), original);
    }

    #[test]
    fn second_segment_continues_cc_from_prior_final() {
        let dir = tempfile::tempdir().unwrap();
        let first = [packet(0, 0), packet(256, 5), packet(256, 6)];
        let first_path = write_segment(dir.path(), "000.ts", &first);

        let pp = PostProcessor::new();
        pp.process("v1", "1080p", 0, &first_path);

        // Encoder reset: segment 1 starts its own PID 256 stream back at cc=0.
        let second = [packet(256, 0), packet(256, 1)];
        let second_path = write_segment(dir.path(), "001.ts", &second);
        pp.process("v1", "1080p", 1, &second_path);

        let rewritten = std::fs::read(&second_path).unwrap();
        let first_packet_cc = rewritten[3] & 0x0F;
        let second_packet_cc = rewritten[PACKET_SIZE + 3] & 0x0F;
        // Prior final cc for PID 256 was 6, so the new segment continues at 7, 8.
        assert_eq!(first_packet_cc, 7);
        assert_eq!(second_packet_cc, 8);
    }

    #[test]
    fn pat_pid_is_never_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let first = [packet(0, 3), packet(256, 5)];
        let first_path = write_segment(dir.path(), "000.ts", &first);
        let pp = PostProcessor::new();
        pp.process("v1", "1080p", 0, &first_path);

        let second = [packet(0, 0), packet(256, 0)];
        let second_path = write_segment(dir.path(), "001.ts", &second);
        pp.process("v1", "1080p", 1, &second_path);

        let rewritten = std::fs::read(&second_path).unwrap();
        assert_eq!(rewritten[3] & 0x0F, 0, "PAT packet's cc must pass through unchanged");
    }

    #[test]
    fn pmt_pid_is_never_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let first = [pat_packet(4096, 3), packet(4096, 1), packet(256, 5)];
        let first_path = write_segment(dir.path(), "000.ts", &first);
        let pp = PostProcessor::new();
        pp.process("v1", "1080p", 0, &first_path);

        let second = [pat_packet(4096, 0), packet(4096, 0), packet(256, 0)];
        let second_path = write_segment(dir.path(), "001.ts", &second);
        pp.process("v1", "1080p", 1, &second_path);

        let rewritten = std::fs::read(&second_path).unwrap();
        let pmt_cc = rewritten[PACKET_SIZE + 3] & 0x0F;
        assert_eq!(pmt_cc, 0, "PMT packet's cc must pass through unchanged");
    }

    #[test]
    fn parses_pmt_pid_from_pat_section() {
        let pat = pat_packet(4096, 0);
        assert_eq!(parse_pmt_pid(&pat), Some(4096));
    }

    #[test]
    fn malformed_file_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ts");
        std::fs::write(&path, b"not a ts segment").unwrap();
        let pp = PostProcessor::new();
        pp.process("v1", "1080p", 1, &path);
        assert_eq!(std::fs::read(&path).unwrap(), b"not a ts segment");
    }
}
