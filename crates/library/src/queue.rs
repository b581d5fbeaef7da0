use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::BufReader;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use common::Lyrics;
use crossbeam_channel::{Receiver, Sender};
use metadata::{
    parse_artist_info, parse_lyrics, parse_playlist, read_image_info, ImageInfo, OpenTagReader,
    ParsedArtistInfo, ParsedPlayList, ParsedTrack, TrackMetadataParser,
};
use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::settings::FileKind;
use crate::LibraryError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub file_size: u64,
    /// Milliseconds since the unix epoch.
    pub last_write_time: u64,
}

#[derive(Clone, Debug)]
pub struct ScanRequest {
    pub path: PathBuf,
    pub kind: FileKind,
    pub file_info: FileInfo,
}

#[derive(Debug)]
pub enum ScanOutput {
    Audio(Result<ParsedTrack, String>),
    Image(Result<ImageInfo, String>),
    Lyrics(Result<Lyrics, String>),
    PlayList(Result<ParsedPlayList, String>),
    ArtistInfo(Result<ParsedArtistInfo, String>),
    /// The abort flag was raised before the file was parsed.
    Discarded,
}

#[derive(Debug)]
pub struct ScanResult {
    pub request: ScanRequest,
    pub output: ScanOutput,
}

#[derive(Default)]
struct QueueState {
    ongoing: usize,
    results: VecDeque<ScanResult>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    changed: Condvar,
}

impl Shared {
    fn complete(&self, result: Option<ScanResult>) {
        let mut state = self.state.lock();
        if let Some(result) = result {
            state.results.push_back(result);
        }
        state.ongoing = state.ongoing.saturating_sub(1);
        self.changed.notify_all();
    }
}

/// Parses files on a fixed pool of worker threads and hands the results back
/// in completion order.
pub struct FileScanQueue {
    sender: Option<Sender<ScanRequest>>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl FileScanQueue {
    pub fn new(
        thread_count: usize,
        parser: Arc<TrackMetadataParser>,
        open_reader: OpenTagReader,
        abort: Arc<AtomicBool>,
    ) -> Result<Self, LibraryError> {
        let (sender, receiver) = crossbeam_channel::unbounded::<ScanRequest>();
        let shared = Arc::new(Shared::default());

        let mut workers = Vec::new();
        for idx in 0..thread_count.max(1) {
            let receiver: Receiver<ScanRequest> = receiver.clone();
            let shared = Arc::clone(&shared);
            let parser = Arc::clone(&parser);
            let abort = Arc::clone(&abort);
            let handle = thread::Builder::new()
                .name(format!("file-scan-{}", idx))
                .spawn(move || {
                    for request in receiver.iter() {
                        let output = if abort.load(Ordering::Relaxed) {
                            ScanOutput::Discarded
                        } else {
                            guarded_scan_file(&request, &parser, open_reader)
                        };
                        shared.complete(Some(ScanResult { request, output }));
                    }
                })?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
            shared,
        })
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    pub fn push_scan_request(&self, request: ScanRequest) {
        self.shared.state.lock().ongoing += 1;
        let sent = match &self.sender {
            Some(sender) => sender.send(request).is_ok(),
            None => false,
        };
        if !sent {
            warn!("File scan workers are gone; dropping request");
            self.shared.complete(None);
        }
    }

    /// Blocks until at most `max_ongoing` requests are still being parsed.
    pub fn wait(&self, max_ongoing: usize) {
        let mut state = self.shared.state.lock();
        while state.ongoing > max_ongoing {
            self.shared.changed.wait(&mut state);
        }
    }

    pub fn pop_results(&self, max_count: usize) -> Vec<ScanResult> {
        let mut state = self.shared.state.lock();
        let count = max_count.min(state.results.len());
        state.results.drain(..count).collect()
    }

    pub fn results_count(&self) -> usize {
        self.shared.state.lock().results.len()
    }

    pub fn ongoing_count(&self) -> usize {
        self.shared.state.lock().ongoing
    }
}

impl Drop for FileScanQueue {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// A panicking parser must still hand back a result, or `wait` never returns.
fn guarded_scan_file(
    request: &ScanRequest,
    parser: &TrackMetadataParser,
    open_reader: OpenTagReader,
) -> ScanOutput {
    match panic::catch_unwind(AssertUnwindSafe(|| scan_file(request, parser, open_reader))) {
        Ok(output) => output,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|reason| reason.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown cause".to_string());
            warn!("Parser panicked on {:?}: {}", request.path, reason);
            let message = format!("panic while parsing: {}", reason);
            match request.kind {
                FileKind::Audio => ScanOutput::Audio(Err(message)),
                FileKind::Image => ScanOutput::Image(Err(message)),
                FileKind::Lyrics => ScanOutput::Lyrics(Err(message)),
                FileKind::PlayList => ScanOutput::PlayList(Err(message)),
                FileKind::ArtistInfo => ScanOutput::ArtistInfo(Err(message)),
            }
        }
    }
}

fn scan_file(request: &ScanRequest, parser: &TrackMetadataParser, open_reader: OpenTagReader) -> ScanOutput {
    match request.kind {
        FileKind::Audio => ScanOutput::Audio(
            open_reader(&request.path)
                .map(|reader| parser.parse(reader.as_ref()))
                .map_err(|err| err.to_string()),
        ),
        FileKind::Image => {
            ScanOutput::Image(read_image_info(&request.path).map_err(|err| err.to_string()))
        }
        FileKind::Lyrics => ScanOutput::Lyrics(
            File::open(&request.path)
                .and_then(|file| parse_lyrics(BufReader::new(file)))
                .map_err(|err| err.to_string()),
        ),
        FileKind::PlayList => ScanOutput::PlayList(
            File::open(&request.path)
                .and_then(|file| parse_playlist(BufReader::new(file)))
                .map_err(|err| err.to_string()),
        ),
        FileKind::ArtistInfo => ScanOutput::ArtistInfo(
            fs::read_to_string(&request.path)
                .map_err(|err| err.to_string())
                .and_then(|text| parse_artist_info(&text).map_err(|err| err.to_string())),
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use metadata::{AudioProperties, MetadataError, ParserSettings, TagKind, TagReader};

    use super::*;

    struct TitleReader(String);

    impl TagReader for TitleReader {
        fn audio_properties(&self) -> AudioProperties {
            AudioProperties::default()
        }

        fn values_for(&self, kind: TagKind) -> Vec<String> {
            match kind {
                TagKind::Title => vec![self.0.clone()],
                _ => Vec::new(),
            }
        }

        fn values_for_raw(&self, _name: &str) -> Vec<String> {
            Vec::new()
        }

        fn visit_performers(&self, _visitor: &mut dyn FnMut(&str, &str)) {}

        fn visit_lyrics(&self, _visitor: &mut dyn FnMut(&str, &str)) {}

        fn has_embedded_image(&self) -> bool {
            false
        }
    }

    fn open_slow(path: &Path) -> Result<Box<dyn TagReader>, MetadataError> {
        thread::sleep(Duration::from_millis(20));
        let name = path.to_string_lossy().to_string();
        if name.contains("broken") {
            return Err(MetadataError::UnsupportedImage);
        }
        Ok(Box::new(TitleReader(name)))
    }

    fn queue(threads: usize, abort: Arc<AtomicBool>) -> FileScanQueue {
        let parser = Arc::new(TrackMetadataParser::new(ParserSettings::default()));
        FileScanQueue::new(threads, parser, open_slow, abort).unwrap()
    }

    fn request(name: &str) -> ScanRequest {
        ScanRequest {
            path: PathBuf::from(name),
            kind: FileKind::Audio,
            file_info: FileInfo::default(),
        }
    }

    #[test]
    fn wait_drains_to_threshold() {
        let queue = queue(2, Arc::new(AtomicBool::new(false)));
        for idx in 0..6 {
            queue.push_scan_request(request(&format!("/music/{}.flac", idx)));
        }
        queue.wait(2);
        assert!(queue.ongoing_count() <= 2);
        queue.wait(0);
        assert_eq!(queue.ongoing_count(), 0);
        assert_eq!(queue.results_count(), 6);

        let first = queue.pop_results(4);
        assert_eq!(first.len(), 4);
        assert_eq!(queue.pop_results(10).len(), 2);
        assert_eq!(queue.results_count(), 0);
    }

    #[test]
    fn parse_failures_come_back_as_results() {
        let queue = queue(1, Arc::new(AtomicBool::new(false)));
        queue.push_scan_request(request("/music/broken.flac"));
        queue.push_scan_request(request("/music/fine.flac"));
        queue.wait(0);
        let results = queue.pop_results(10);
        assert!(matches!(results[0].output, ScanOutput::Audio(Err(_))));
        match &results[1].output {
            ScanOutput::Audio(Ok(track)) => assert_eq!(track.title, "/music/fine.flac"),
            other => panic!("unexpected output {:?}", other),
        }
    }

    fn open_panicking(path: &Path) -> Result<Box<dyn TagReader>, MetadataError> {
        if path.to_string_lossy().contains("explode") {
            panic!("malformed frame");
        }
        open_slow(path)
    }

    #[test]
    fn panicking_parser_still_completes_the_request() {
        let parser = Arc::new(TrackMetadataParser::new(ParserSettings::default()));
        let queue =
            FileScanQueue::new(1, parser, open_panicking, Arc::new(AtomicBool::new(false))).unwrap();
        queue.push_scan_request(request("/music/explode.flac"));
        queue.push_scan_request(request("/music/after.flac"));
        queue.wait(0);

        let results = queue.pop_results(10);
        assert_eq!(results.len(), 2);
        match &results[0].output {
            ScanOutput::Audio(Err(message)) => assert!(message.contains("malformed frame")),
            other => panic!("unexpected output {:?}", other),
        }
        assert!(matches!(results[1].output, ScanOutput::Audio(Ok(_))));
    }

    #[test]
    fn abort_discards_pending_requests() {
        let abort = Arc::new(AtomicBool::new(true));
        let queue = queue(2, Arc::clone(&abort));
        for idx in 0..4 {
            queue.push_scan_request(request(&format!("/music/{}.flac", idx)));
        }
        queue.wait(0);
        let results = queue.pop_results(10);
        assert_eq!(results.len(), 4);
        assert!(results
            .iter()
            .all(|result| matches!(result.output, ScanOutput::Discarded)));
    }

    #[test]
    fn images_and_lyrics_are_parsed_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let lrc = dir.path().join("song.lrc");
        std::fs::write(&lrc, "[00:01.00]Hello").unwrap();
        let image = dir.path().join("cover.jpg");
        std::fs::write(&image, b"garbage").unwrap();

        let queue = queue(1, Arc::new(AtomicBool::new(false)));
        queue.push_scan_request(ScanRequest {
            path: lrc,
            kind: FileKind::Lyrics,
            file_info: FileInfo::default(),
        });
        queue.push_scan_request(ScanRequest {
            path: image,
            kind: FileKind::Image,
            file_info: FileInfo::default(),
        });
        queue.wait(0);
        let results = queue.pop_results(10);
        match &results[0].output {
            ScanOutput::Lyrics(Ok(lyrics)) => assert!(lyrics.is_synchronized()),
            other => panic!("unexpected output {:?}", other),
        }
        assert!(matches!(results[1].output, ScanOutput::Image(Err(_))));
    }

    #[test]
    fn playlists_and_artist_infos_are_parsed_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let m3u = dir.path().join("mix.m3u");
        std::fs::write(&m3u, "#EXTM3U\n#PLAYLIST:Mix\na.flac\n").unwrap();
        let nfo = dir.path().join("artist.nfo");
        std::fs::write(&nfo, "<artist><sortname>Nameless</sortname></artist>").unwrap();

        let queue = queue(1, Arc::new(AtomicBool::new(false)));
        queue.push_scan_request(ScanRequest {
            path: m3u,
            kind: FileKind::PlayList,
            file_info: FileInfo::default(),
        });
        queue.push_scan_request(ScanRequest {
            path: nfo,
            kind: FileKind::ArtistInfo,
            file_info: FileInfo::default(),
        });
        queue.wait(0);
        let results = queue.pop_results(10);
        match &results[0].output {
            ScanOutput::PlayList(Ok(playlist)) => {
                assert_eq!(playlist.name, "Mix");
                assert_eq!(playlist.files, vec!["a.flac"]);
            }
            other => panic!("unexpected output {:?}", other),
        }
        assert!(matches!(results[1].output, ScanOutput::ArtistInfo(Err(_))));
    }
}
