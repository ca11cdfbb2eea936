//! Frame sources for the real-time loop.

use facegate_core::Frame;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("cannot decode {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no images given")]
    Empty,
}

/// Supplies the current frame on request.
pub trait FrameSource: Send {
    /// `None` when no frame is ready; the tick is skipped.
    fn next_frame(&mut self) -> Option<Frame>;
}

impl<F> FrameSource for F
where
    F: FnMut() -> Option<Frame> + Send,
{
    fn next_frame(&mut self) -> Option<Frame> {
        self()
    }
}

/// The same frame on every tick.
pub struct StaticFrame {
    frame: Frame,
    served: u32,
}

impl StaticFrame {
    pub fn new(frame: Frame) -> Self {
        Self { frame, served: 0 }
    }
}

impl FrameSource for StaticFrame {
    fn next_frame(&mut self) -> Option<Frame> {
        let frame = self.frame.clone().with_sequence(self.served);
        self.served = self.served.wrapping_add(1);
        Some(frame)
    }
}

/// Decoded images served in order, optionally wrapping around.
pub struct ImageSequence {
    frames: Vec<Frame>,
    cursor: usize,
    looping: bool,
}

impl ImageSequence {
    /// Decode every image up front.
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self, SourceError> {
        if paths.is_empty() {
            return Err(SourceError::Empty);
        }
        let frames = paths
            .iter()
            .map(|p| {
                let path = p.as_ref();
                let image = image::open(path).map_err(|source| SourceError::Image {
                    path: path.to_path_buf(),
                    source,
                })?;
                tracing::debug!(path = %path.display(), width = image.width(), height = image.height(), "decoded frame");
                Ok(Frame::from_image(&image))
            })
            .collect::<Result<Vec<_>, SourceError>>()?;
        Ok(Self::from_frames(frames))
    }

    pub fn from_frames(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            cursor: 0,
            looping: true,
        }
    }

    /// Stop after the last image instead of starting over.
    pub fn once(mut self) -> Self {
        self.looping = false;
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Option<Frame> {
        if self.frames.is_empty() {
            return None;
        }
        if self.cursor >= self.frames.len() {
            if !self.looping {
                return None;
            }
            self.cursor = 0;
        }
        let frame = self.frames[self.cursor].clone().with_sequence(self.cursor as u32);
        self.cursor += 1;
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(value: u8) -> Frame {
        Frame::from_gray(&[value; 16], 4, 4).unwrap()
    }

    #[test]
    fn test_static_frame_repeats() {
        let mut source = StaticFrame::new(gray(7));
        let a = source.next_frame().unwrap();
        let b = source.next_frame().unwrap();
        assert_eq!(a.data, b.data);
        assert_eq!((a.sequence, b.sequence), (0, 1));
    }

    #[test]
    fn test_sequence_loops() {
        let mut source = ImageSequence::from_frames(vec![gray(1), gray(2)]);
        let seen: Vec<u8> = (0..5).map(|_| source.next_frame().unwrap().data[0]).collect();
        assert_eq!(seen, vec![1, 2, 1, 2, 1]);
    }

    #[test]
    fn test_sequence_once_ends() {
        let mut source = ImageSequence::from_frames(vec![gray(1)]).once();
        assert!(source.next_frame().is_some());
        assert!(source.next_frame().is_none());
    }

    #[test]
    fn test_open_rejects_empty_and_missing() {
        let none: [&str; 0] = [];
        assert!(matches!(ImageSequence::open(&none), Err(SourceError::Empty)));
        assert!(matches!(
            ImageSequence::open(&["/nonexistent/face.png"]),
            Err(SourceError::Image { .. })
        ));
    }

    #[test]
    fn test_closure_source() {
        let mut ticks = 0;
        let mut source = move || {
            ticks += 1;
            (ticks % 2 == 0).then(|| gray(3))
        };
        assert!(FrameSource::next_frame(&mut source).is_none());
        assert!(FrameSource::next_frame(&mut source).is_some());
    }
}
