use super::constants::{GBL_TRACK, MULTIPLET_TRACK, STRAIGHT_LINE_TRACK, STRAIGHT_LINE_TRACK_VALUES};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StraightLineTrack {
    pub point: [f64; 3],
    pub direction: [f64; 3],
    pub uncertainties: [f64; 4],
}

impl StraightLineTrack {
    /// Build a track from point xyz, direction xyz, and 4 uncertainties, in that order
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.len() != STRAIGHT_LINE_TRACK_VALUES {
            return None;
        }
        Some(Self {
            point: [values[0], values[1], values[2]],
            direction: [values[3], values[4], values[5]],
            uncertainties: [values[6], values[7], values[8], values[9]],
        })
    }

    /// Position of the track at a given z
    pub fn at_z(&self, z: f64) -> Option<[f64; 3]> {
        if self.direction[2] == 0.0 {
            return None;
        }
        let t = (z - self.point[2]) / self.direction[2];
        Some([
            self.point[0] + t * self.direction[0],
            self.point[1] + t * self.direction[1],
            z,
        ])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Track {
    StraightLine(StraightLineTrack),
}

/// Tracks found in one run of the external reconstruction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackScan {
    pub tracks: Vec<Track>,
    /// Known track kinds we do not decode
    pub unimplemented: usize,
    /// Straight line tracks with the wrong number of values
    pub malformed: usize,
}

/// Pull every number out of a piece of text, whatever separates them
pub fn scan_floats(text: &str) -> Vec<f64> {
    text.split(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')))
        .filter(|token| !token.is_empty())
        .filter_map(|token| token.parse::<f64>().ok())
        .collect()
}

/// Scan the text output of the external reconstruction line by line
pub fn scan_tracks(output: &str) -> TrackScan {
    let mut scan = TrackScan::default();
    for line in output.lines() {
        if let Some(pos) = line.find(STRAIGHT_LINE_TRACK) {
            let values = scan_floats(&line[pos + STRAIGHT_LINE_TRACK.len()..]);
            match StraightLineTrack::from_values(&values) {
                Some(track) => scan.tracks.push(Track::StraightLine(track)),
                None => {
                    log::debug!(
                        "Skipping straight line track with {} values: {line}",
                        values.len()
                    );
                    scan.malformed += 1;
                }
            }
        } else if line.contains(GBL_TRACK) || line.contains(MULTIPLET_TRACK) {
            scan.unimplemented += 1;
        }
    }
    if scan.unimplemented > 0 {
        log::debug!(
            "Ignored {} tracks of a kind that is not implemented",
            scan.unimplemented
        );
    }
    scan
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_floats() {
        assert_eq!(
            scan_floats("(1.5, -2, 3e2) dir: +0.25,nan"),
            vec![1.5, -2.0, 300.0, 0.25]
        );
        assert!(scan_floats("no numbers here").is_empty());
    }

    #[test]
    fn test_scan_tracks() {
        let output = "\
INFO  Running reconstruction
StraightLineTrack point (0.1, 0.2, 0) direction (0, 0.01, 1) errors 1e-3 2e-3 3e-3 4e-3
GblTrack something we do not handle
StraightLineTrack 1 2 3
Multiplet 1 2 3
";
        let scan = scan_tracks(output);
        assert_eq!(scan.tracks.len(), 1);
        assert_eq!(scan.unimplemented, 2);
        assert_eq!(scan.malformed, 1);

        let Track::StraightLine(track) = &scan.tracks[0];
        assert_eq!(track.point, [0.1, 0.2, 0.0]);
        assert_eq!(track.direction, [0.0, 0.01, 1.0]);
        assert_eq!(track.uncertainties, [1e-3, 2e-3, 3e-3, 4e-3]);
    }

    #[test]
    fn test_at_z() {
        let track = StraightLineTrack {
            point: [1.0, 2.0, 0.0],
            direction: [0.5, 0.0, 1.0],
            uncertainties: [0.0; 4],
        };
        assert_eq!(track.at_z(4.0), Some([3.0, 2.0, 4.0]));
        let flat = StraightLineTrack::default();
        assert_eq!(flat.at_z(1.0), None);
    }
}
