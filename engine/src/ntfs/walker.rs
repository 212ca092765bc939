// Parallel MFT walk
// One pool task per capped extent: read, scan records, stage entries

use super::boot::parse_boot_sector;
use super::data_runs::DataRunIter;
use super::record::{mft_geometry, parse_file_record, FILE_RECORD_SIZE};
use super::stage::Staging;
use crate::volume::{Volume, FILE_RECORD_OUTPUT_HEADER};
use findex_core::sync::{BufferPool, WorkerPool};
use findex_core::{FileIndex, FindexError, ProgressGauge};
use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cap each extent read at this many file records.
const RECORDS_PER_READ: usize = 1024;

/// Build a `FileIndex` by decoding the volume's MFT directly.
///
/// Per-record decoding failures and failed extent reads are dropped and
/// counted; the walk itself only fails when the volume or the `$MFT`
/// record cannot be opened at all.
pub fn walk_volume(letter: char, progress: &Arc<ProgressGauge>) -> Result<FileIndex, FindexError> {
    let label = format!("{}:", letter.to_ascii_uppercase());

    let boot = {
        let volume = Volume::open(letter)?;
        let mut sector = vec![0u8; 512];
        volume.read_at(&mut sector, 0)?;
        parse_boot_sector(&sector)?
    };
    let cluster_bytes = boot.cluster_bytes();
    let records_per_cluster = (cluster_bytes as usize / FILE_RECORD_SIZE).max(1);
    let cluster_limit = (RECORDS_PER_READ / records_per_cluster).max(1) as u64;

    let volume = Arc::new(Volume::open_direct(letter)?);

    let mut record0 = vec![0u8; FILE_RECORD_OUTPUT_HEADER + FILE_RECORD_SIZE];
    volume.file_record(0, &mut record0)?;
    let geometry = mft_geometry(&record0[FILE_RECORD_OUTPUT_HEADER..])
        .ok_or_else(|| FindexError::Other("Malformed $MFT record".to_string()))?;

    info!(
        "MFT walk on {label}: {} records, {cluster_bytes}-byte clusters",
        geometry.record_count
    );
    progress.set_total(geometry.record_count);

    let buffers = Arc::new(BufferPool::new(
        cluster_limit as usize * cluster_bytes as usize,
        cluster_bytes as usize,
    ));
    let staging = Arc::new(Staging::new());
    let skipped_records = Arc::new(AtomicU64::new(0));
    let failed_extents = Arc::new(AtomicU64::new(0));

    let pool = WorkerPool::new();
    let mut runs = DataRunIter::new(&geometry.data_runs);
    while let Some(extent) = runs.next_extent(cluster_limit) {
        let volume = Arc::clone(&volume);
        let buffers = Arc::clone(&buffers);
        let staging = Arc::clone(&staging);
        let skipped = Arc::clone(&skipped_records);
        let failed = Arc::clone(&failed_extents);
        let progress = Arc::clone(progress);
        let label = label.clone();

        pool.execute(move || {
            let mut buf = buffers.acquire();
            let byte_len = (extent.clusters * cluster_bytes as u64) as usize;
            let offset = extent.lcn * cluster_bytes as u64;

            match volume.read_at(&mut buf.as_mut_slice()[..byte_len], offset) {
                Err(e) => {
                    debug!("Extent read at LCN {} failed: {e}", extent.lcn);
                    failed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(()) => {
                    let records = byte_len / FILE_RECORD_SIZE;
                    for i in 0..records {
                        let chunk =
                            &mut buf.as_mut_slice()[i * FILE_RECORD_SIZE..(i + 1) * FILE_RECORD_SIZE];
                        match parse_file_record(chunk, cluster_bytes, &label) {
                            Some(parsed) => staging.stage_record(&parsed),
                            None => {
                                skipped.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                    progress.add(records as u64);
                }
            }
            buffers.release(buf);
        });
    }

    pool.wait();
    drop(pool);

    info!(
        "MFT walk done: {} entries staged, {} records skipped, {} extents failed",
        staging.staged_entries(),
        skipped_records.load(Ordering::Relaxed),
        failed_extents.load(Ordering::Relaxed)
    );

    let staging = Arc::try_unwrap(staging)
        .map_err(|_| FindexError::Other("Staging still referenced after pool drain".to_string()))?;
    Ok(staging.finish())
}
