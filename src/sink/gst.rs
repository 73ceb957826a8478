//! H.264/MP4 sink via GStreamer (`encode-gstreamer` feature).
//!
//! Pipeline: `appsrc ! videoconvert ! x264enc ! mp4mux ! filesink`. Frames are
//! pushed with presentation timestamps derived from the resolved frame rate,
//! so the container timeline matches the delivery order even when attempts
//! failed in between.

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use std::path::{Path, PathBuf};

use super::{fps_fraction, VideoSink};
use crate::device::ResolvedParameters;
use crate::frame::{Frame, PixelFormat};

pub struct GstSink {
    pipeline: gstreamer::Pipeline,
    appsrc: gstreamer_app::AppSrc,
    path: PathBuf,
    frame_duration_ns: u64,
    frames_written: u64,
    finalized: bool,
}

impl GstSink {
    pub fn open(path: &Path, resolved: &ResolvedParameters) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "appsrc name=src is-live=false format=time ! videoconvert ! \
             x264enc tune=zerolatency ! mp4mux ! filesink location=\"{}\"",
            path.display()
        );
        let pipeline = gstreamer::parse_launch(&pipeline_description)
            .context("build encoder pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("encoder pipeline is not a Pipeline"))?;

        let appsrc = pipeline
            .by_name("src")
            .context("appsrc element missing from pipeline")?
            .downcast::<gstreamer_app::AppSrc>()
            .map_err(|_| anyhow!("appsrc element has unexpected type"))?;

        let format = match resolved.pixel_format {
            PixelFormat::Mono8 => gstreamer_video::VideoFormat::Gray8,
            PixelFormat::Rgb24 => gstreamer_video::VideoFormat::Rgb,
        };
        let (num, den) = fps_fraction(resolved.frame_rate);
        let info =
            gstreamer_video::VideoInfo::builder(format, resolved.width, resolved.height)
                .fps(gstreamer::Fraction::new(num as i32, den as i32))
                .build()
                .context("build video info for resolved resolution")?;
        let caps = info.to_caps().context("build caps for resolved resolution")?;
        appsrc.set_caps(Some(&caps));

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("start encoder pipeline")?;

        Ok(Self {
            pipeline,
            appsrc,
            path: path.to_path_buf(),
            frame_duration_ns: 1_000_000_000u64 * den as u64 / num as u64,
            frames_written: 0,
            finalized: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VideoSink for GstSink {
    fn append(&mut self, frame: &Frame) -> Result<()> {
        if self.finalized {
            return Err(anyhow!("video sink already finalized"));
        }

        let mut buffer = gstreamer::Buffer::from_mut_slice(frame.data().to_vec());
        {
            let buffer = buffer
                .get_mut()
                .ok_or_else(|| anyhow!("frame buffer not writable"))?;
            buffer.set_pts(Some(gstreamer::ClockTime::from_nseconds(
                self.frames_written * self.frame_duration_ns,
            )));
            buffer.set_duration(Some(gstreamer::ClockTime::from_nseconds(
                self.frame_duration_ns,
            )));
        }
        self.appsrc
            .push_buffer(buffer)
            .map_err(|err| anyhow!("push frame to encoder: {err}"))?;

        self.frames_written += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        self.appsrc
            .end_of_stream()
            .map_err(|err| anyhow!("signal end of stream: {err}"))?;

        // Wait for the muxer to write its trailer before tearing down, so the
        // container index is complete.
        if let Some(bus) = self.pipeline.bus() {
            use gstreamer::MessageView;
            let message = bus.timed_pop_filtered(
                gstreamer::ClockTime::from_seconds(10),
                &[gstreamer::MessageType::Eos, gstreamer::MessageType::Error],
            );
            if let Some(message) = message {
                if let MessageView::Error(err) = message.view() {
                    let _ = self.pipeline.set_state(gstreamer::State::Null);
                    return Err(anyhow!("encoder error while finalizing: {}", err.error()));
                }
            }
        }

        self.pipeline
            .set_state(gstreamer::State::Null)
            .context("stop encoder pipeline")?;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Drop for GstSink {
    fn drop(&mut self) {
        let _ = self.finalize();
    }
}
