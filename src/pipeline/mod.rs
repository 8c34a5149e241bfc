//! Pipeline - Detection Event Processing Worker
//!
//! ## Responsibilities
//!
//! - Drain the detection-event channel fed by the inference dispatcher
//! - Transform coordinates, evaluate access control, update zone state
//! - Fan out ME_OD, then first-detection ME_FD (at most once per object id)
//! - Crop and persist first-detection images
//!
//! The frame JPEG is fetched by the dispatcher at event receipt and carried
//! in the job, so cropping never races the frame ring's age-out. Zone status
//! messages are emitted before ME_OD/ME_FD for the same tick.

use crate::access_control::{self, AccessCache};
use crate::coord_transform::{AreaTable, CalibrationStore, CoordTransformer};
use crate::detection_buffer::DetectionBuffer;
use crate::error::{Error, Result};
use crate::fanout_hub::{ClientRole, FanoutHub};
use crate::models::{BBox, Detection, Violation};
use crate::protocol::controller::{self, FdMessage, OdEntry};
use crate::repository::Repository;
use crate::zone_engine::ZoneEngine;
use chrono::Utc;
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Detection-event channel capacity
pub const PIPELINE_QUEUE_DEPTH: usize = 1024;

/// Crops larger than this are re-encoded at reduced quality
const RECODE_THRESHOLD: usize = 4096;
const RECODE_QUALITY: u8 = 85;

/// One object_detected event, with the owning frame fetched eagerly
#[derive(Debug)]
pub struct PipelineJob {
    pub camera_id: String,
    pub frame_id: i64,
    pub detections: Vec<Detection>,
    pub frame_jpeg: Option<Vec<u8>>,
}

/// Collaborators of the pipeline worker
pub struct PipelineContext {
    pub detection_buffer: Arc<DetectionBuffer>,
    pub calibration: Arc<CalibrationStore>,
    pub transformer: CoordTransformer,
    pub areas: Arc<AreaTable>,
    pub access: Arc<AccessCache>,
    pub zones: Arc<ZoneEngine>,
    pub hub: Arc<FanoutHub>,
    pub repository: Arc<Repository>,
}

/// Worker loop. `alerted` is seeded from DETECTED_OBJECT at startup and is
/// owned exclusively by this task.
pub async fn run_worker(
    ctx: PipelineContext,
    mut rx: mpsc::Receiver<PipelineJob>,
    mut alerted: HashSet<i64>,
) {
    tracing::info!(seeded = alerted.len(), "Pipeline worker started");
    while let Some(job) = rx.recv().await {
        process_job(&ctx, &mut alerted, job).await;
    }
    tracing::info!("Pipeline worker stopped");
}

async fn process_job(ctx: &PipelineContext, alerted: &mut HashSet<i64>, job: PipelineJob) {
    ctx.detection_buffer
        .put(&job.camera_id, job.frame_id, job.detections.clone())
        .await;

    let calibration = ctx.calibration.get(&job.camera_id).await;
    let frame_size = if calibration.is_none() {
        job.frame_jpeg.as_deref().and_then(jpeg_dimensions)
    } else {
        None
    };

    let authority = ctx.access.snapshot().await;
    let violations: Vec<Violation> = job
        .detections
        .iter()
        .cloned()
        .map(|det| {
            ctx.transformer
                .locate(det, calibration.as_ref(), frame_size, &ctx.areas)
        })
        .filter_map(|located| access_control::evaluate(located, &authority))
        .collect();

    if violations.is_empty() {
        return;
    }

    // zone status transitions fire before ME_OD/ME_FD for this tick
    let mut zone_ids: Vec<u8> = violations.iter().filter_map(|v| v.located.area_id).collect();
    zone_ids.sort_unstable();
    zone_ids.dedup();
    ctx.zones.observe(&zone_ids).await;

    let entries: Vec<OdEntry> = violations
        .iter()
        .map(|v| OdEntry {
            object_id: v.object_id(),
            class_name: v.class().name(),
            map_x: v.located.map_point().0,
            map_y: v.located.map_point().1,
            area_name: ctx.areas.wire_name(v.located.area_id),
            rescue_level: v.rescue_level,
        })
        .collect();
    ctx.hub
        .broadcast(ClientRole::Controller, controller::encode_me_od(&entries).as_bytes())
        .await;

    for violation in violations {
        let object_id = violation.object_id();
        if alerted.contains(&object_id) {
            continue;
        }
        alerted.insert(object_id);
        first_detection(ctx, &violation, job.frame_jpeg.as_deref()).await;
    }
}

/// Persist the first sighting of an object and emit ME_FD on success
async fn first_detection(ctx: &PipelineContext, violation: &Violation, frame_jpeg: Option<&[u8]>) {
    let object_id = violation.object_id();
    let image = match frame_jpeg {
        Some(jpeg) => match crop_jpeg(jpeg, &violation.located.detection.bbox) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::error!(object_id = object_id, error = %e, "Crop failed, persisting without image");
                None
            }
        },
        None => {
            tracing::error!(object_id = object_id, "Owning frame unavailable, persisting without image");
            None
        }
    };

    let timestamp = Utc::now();
    let (map_x, map_y) = violation.located.map_point();
    let saved = ctx
        .repository
        .save_first_detection(
            object_id,
            violation.event_type,
            violation.class(),
            violation.located.area_id,
            map_x,
            map_y,
            timestamp,
            image.as_deref(),
        )
        .await;

    match saved {
        Ok(_) => {
            if let Some(image) = image {
                let message = FdMessage {
                    event_type_id: violation.event_type.type_id(),
                    object_id,
                    class_name: violation.class().name(),
                    map_x,
                    map_y,
                    area_name: ctx.areas.wire_name(violation.located.area_id),
                    timestamp: timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                    rescue_level: violation.rescue_level,
                    image,
                };
                ctx.hub
                    .broadcast(ClientRole::Controller, &message.encode())
                    .await;
                tracing::info!(
                    object_id = object_id,
                    event_type = %violation.event_type.name(),
                    "First detection persisted and announced"
                );
            }
        }
        Err(e) => {
            tracing::error!(object_id = object_id, error = %e, "First detection persistence failed");
        }
    }
}

/// Read JPEG dimensions without decoding the full image
pub fn jpeg_dimensions(jpeg: &[u8]) -> Option<(f64, f64)> {
    image::io::Reader::new(Cursor::new(jpeg))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
        .map(|(w, h)| (w as f64, h as f64))
}

/// Crop the detection region out of the frame and JPEG-encode it.
/// Oversized crops are re-encoded at quality 85.
pub fn crop_jpeg(frame_jpeg: &[u8], bbox: &BBox) -> Result<Vec<u8>> {
    let img = image::load_from_memory(frame_jpeg)?;
    let (fw, fh) = (img.width(), img.height());

    let x1 = bbox.x1.max(0.0).min(fw as f64) as u32;
    let y1 = bbox.y1.max(0.0).min(fh as f64) as u32;
    let x2 = bbox.x2.max(0.0).min(fw as f64) as u32;
    let y2 = bbox.y2.max(0.0).min(fh as f64) as u32;
    if x2 <= x1 || y2 <= y1 {
        return Err(Error::Validation(format!(
            "empty crop region [{},{},{},{}] on {}x{} frame",
            bbox.x1, bbox.y1, bbox.x2, bbox.y2, fw, fh
        )));
    }

    let crop = img.crop_imm(x1, y1, x2 - x1, y2 - y1);
    let mut out = Vec::new();
    crop.write_to(&mut Cursor::new(&mut out), image::ImageOutputFormat::Jpeg(90))?;
    if out.len() > RECODE_THRESHOLD {
        out.clear();
        crop.write_to(
            &mut Cursor::new(&mut out),
            image::ImageOutputFormat::Jpeg(RECODE_QUALITY),
        )?;
    }
    Ok(out)
}
