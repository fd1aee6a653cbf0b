//! End-to-end pipeline tests that require `ffmpeg`/`ffprobe` on PATH.
//! Each test no-ops (with a note) when the tools are unavailable.

use std::{path::Path, process::Command, sync::Arc, time::Duration};

use framewright::{
    BezPath, Canvas, Container, EncodeConfig, FailureReport, FfmpegEncoder, Fps, Frame,
    FramewrightError, FsResourceLoader, Layer, LayerContent, MemoryResourceLoader, OutputParams,
    PipelineController, PixelBuffer, Pts, Quality, RenderJob, Rgba8, Scene, Stage, TextAlign,
    TextLayer, TimeRange, Transform2D, VectorLayer, VideoCodec,
};

fn ffmpeg_tools_available() -> bool {
    let probe = |bin: &str| {
        Command::new(bin)
            .arg("-version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    };
    probe("ffmpeg") && probe("ffprobe")
}

fn ffprobe_duration_secs(path: &Path) -> f64 {
    let out = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .expect("run ffprobe");
    assert!(out.status.success(), "ffprobe failed on {}", path.display());
    String::from_utf8_lossy(&out.stdout)
        .trim()
        .parse::<f64>()
        .expect("parse ffprobe duration")
}

fn ffprobe_stream_types(path: &Path) -> Vec<String> {
    let out = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "stream=codec_type",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .expect("run ffprobe");
    assert!(out.status.success(), "ffprobe failed on {}", path.display());
    String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(|l| l.trim().to_string())
        .collect()
}

fn rect_path(x0: f64, y0: f64, x1: f64, y1: f64) -> BezPath {
    let mut p = BezPath::new();
    p.move_to((x0, y0));
    p.line_to((x1, y0));
    p.line_to((x1, y1));
    p.line_to((x0, y1));
    p.close_path();
    p
}

fn static_rect_layer(duration_s: f64) -> Layer {
    Layer {
        id: "rect".to_string(),
        range: TimeRange::new(0.0, duration_s).unwrap(),
        transform: Transform2D::default(),
        opacity: 1.0,
        z: 0,
        content: LayerContent::Vector(VectorLayer {
            path: rect_path(8.0, 8.0, 56.0, 56.0),
            fill: Some(Rgba8::new(200, 40, 40, 255)),
            stroke: None,
        }),
    }
}

fn scene(duration_s: f64, layers: Vec<Layer>) -> Scene {
    Scene::new(
        Canvas {
            width: 64,
            height: 64,
        },
        Fps::whole(30).unwrap(),
        duration_s,
        layers,
    )
    .unwrap()
}

fn output(name: &str) -> OutputParams {
    OutputParams {
        width: 64,
        height: 64,
        fps: None,
        codec: VideoCodec::H264,
        container: Container::Mp4,
        quality: Quality::Crf(23),
        gop: None,
        out_path: std::env::temp_dir()
            .join(format!("framewright_test_{}_{name}", std::process::id())),
        overwrite: true,
        background: Rgba8::BLACK,
        audio: None,
    }
}

#[test]
fn two_second_scene_encodes_to_two_second_mp4() {
    if !ffmpeg_tools_available() {
        eprintln!("skipping: ffmpeg/ffprobe not on PATH");
        return;
    }
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let job = RenderJob::new(scene(2.0, vec![static_rect_layer(2.0)]), output("e2e.mp4")).unwrap();
    let out_path = job.output.out_path.clone();

    let mut ctl = PipelineController::new();
    let report = ctl.run(job, Arc::new(MemoryResourceLoader::new())).unwrap();

    assert_eq!(report.frames_encoded, 60);
    assert_eq!(report.artifact, out_path);
    let duration = ffprobe_duration_secs(&out_path);
    assert!(
        (duration - 2.0).abs() <= 1.0 / 30.0 + 1e-3,
        "container duration {duration} not within one frame of 2.0s"
    );
    let _ = std::fs::remove_file(&out_path);
}

#[test]
fn cancelled_job_still_produces_finalized_container() {
    if !ffmpeg_tools_available() {
        eprintln!("skipping: ffmpeg/ffprobe not on PATH");
        return;
    }

    // Long enough that cancellation lands mid-render.
    let job = RenderJob::new(
        scene(60.0, vec![static_rect_layer(60.0)]),
        output("cancel.mp4"),
    )
    .unwrap();
    let out_path = job.output.out_path.clone();

    let mut ctl = PipelineController::new();
    let token = ctl.cancel_token();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        token.cancel();
    });

    let report: FailureReport = ctl
        .run(job, Arc::new(MemoryResourceLoader::new()))
        .unwrap_err();
    canceller.join().unwrap();

    assert_eq!(report.stage, Stage::Rendering);
    assert!(matches!(report.cause, FramewrightError::Cancelled));
    assert!(report.frames_completed < 1800);

    // The artifact must be structurally valid despite the early stop.
    assert!(out_path.exists());
    let duration = ffprobe_duration_secs(&out_path);
    assert!(duration >= 0.0);
    let _ = std::fs::remove_file(&out_path);
}

#[test]
fn missing_font_fails_rendering_but_finalizes_output() {
    if !ffmpeg_tools_available() {
        eprintln!("skipping: ffmpeg/ffprobe not on PATH");
        return;
    }

    let text = Layer {
        id: "title".to_string(),
        // Starts at 0.5s so some frames encode before the failure.
        range: TimeRange::new(0.5, 1.0).unwrap(),
        transform: Transform2D::default(),
        opacity: 1.0,
        z: 1,
        content: LayerContent::Text(TextLayer {
            text: "hello".to_string(),
            font: "nonexistent.ttf".to_string(),
            size_px: 16.0,
            color: Rgba8::WHITE,
            align: TextAlign::Left,
            max_width_px: None,
        }),
    };
    let job = RenderJob::new(
        scene(1.0, vec![static_rect_layer(1.0), text]),
        output("missing_font.mp4"),
    )
    .unwrap();
    let out_path = job.output.out_path.clone();

    let mut ctl = PipelineController::new();
    let report = ctl
        .run(job, Arc::new(MemoryResourceLoader::new()))
        .unwrap_err();

    assert_eq!(report.stage, Stage::Rendering);
    assert!(matches!(report.cause, FramewrightError::ResourceMissing(_)));
    assert!(report.cause.to_string().contains("title"));
    // Frames before t=0.5 rendered fine; the artifact was finalized anyway.
    assert!(report.frames_completed >= 1);
    assert!(out_path.exists());
    let duration = ffprobe_duration_secs(&out_path);
    assert!(duration > 0.0);
    let _ = std::fs::remove_file(&out_path);
}

#[test]
fn invalid_job_fails_validation_without_touching_disk() {
    // No ffmpeg needed: validation runs before the encoder is created.
    let mut bad = static_rect_layer(1.0);
    bad.range = TimeRange::new(0.0, 5.0).unwrap();
    let scene = Scene {
        canvas: Canvas {
            width: 64,
            height: 64,
        },
        fps: Fps::whole(30).unwrap(),
        duration_s: 1.0,
        layers: vec![bad],
    };
    let out = output("invalid.mp4");
    let out_path = out.out_path.clone();

    let mut ctl = PipelineController::new();
    let report = ctl
        .run(
            RenderJob { scene, output: out },
            Arc::new(MemoryResourceLoader::new()),
        )
        .unwrap_err();

    assert_eq!(report.stage, Stage::Validation);
    assert!(matches!(report.cause, FramewrightError::Validation(_)));
    assert_eq!(report.frames_completed, 0);
    assert!(!out_path.exists());
}

#[test]
fn audio_track_is_muxed_into_container() {
    if !ffmpeg_tools_available() {
        eprintln!("skipping: ffmpeg/ffprobe not on PATH");
        return;
    }

    let res_dir = std::env::temp_dir().join(format!("framewright_res_{}", std::process::id()));
    std::fs::create_dir_all(&res_dir).unwrap();
    let wav = res_dir.join("tone.wav");
    let status = Command::new("ffmpeg")
        .args([
            "-v",
            "error",
            "-y",
            "-f",
            "lavfi",
            "-i",
            "sine=frequency=440:sample_rate=44100",
            "-t",
            "1",
        ])
        .arg(&wav)
        .status()
        .expect("synthesize test audio");
    assert!(status.success());

    let mut out = output("with_audio.mp4");
    out.audio = Some("tone.wav".to_string());
    let job = RenderJob::new(scene(1.0, vec![static_rect_layer(1.0)]), out).unwrap();
    let out_path = job.output.out_path.clone();

    let mut ctl = PipelineController::new();
    let report = ctl
        .run(job, Arc::new(FsResourceLoader::new(&res_dir)))
        .unwrap();
    assert_eq!(report.frames_encoded, 30);

    let mut types = ffprobe_stream_types(&out_path);
    types.sort();
    assert_eq!(types, vec!["audio".to_string(), "video".to_string()]);

    let _ = std::fs::remove_file(&out_path);
    let _ = std::fs::remove_dir_all(&res_dir);
}

#[test]
fn encoder_rejects_non_increasing_pts() {
    if !ffmpeg_tools_available() {
        eprintln!("skipping: ffmpeg/ffprobe not on PATH");
        return;
    }

    let out_path = std::env::temp_dir().join(format!(
        "framewright_test_{}_bad_pts.mp4",
        std::process::id()
    ));
    let mut enc = FfmpegEncoder::new(EncodeConfig {
        width: 64,
        height: 64,
        fps: Fps::whole(30).unwrap(),
        codec: VideoCodec::H264,
        container: Container::Mp4,
        quality: Quality::Crf(23),
        gop: None,
        out_path: out_path.clone(),
        overwrite: true,
        bg_rgba: [0, 0, 0, 255],
        audio: None,
    })
    .unwrap();

    let frame_at = |index: u64, pts: Pts| Frame {
        index,
        pts,
        buffer: PixelBuffer {
            width: 64,
            height: 64,
            data: vec![0u8; 64 * 64 * 4],
            premultiplied: false,
        },
    };

    enc.encode_frame(&frame_at(0, Pts(0))).unwrap();
    // A repeated timestamp is a sequencing defect, fatal to the job.
    let err = enc.encode_frame(&frame_at(1, Pts(0))).unwrap_err();
    assert!(matches!(err, FramewrightError::OrderingViolation(_)));
    assert!(err.to_string().contains("frame 1"));

    let _ = enc.finish();
    let _ = std::fs::remove_file(&out_path);
}

#[test]
fn missing_audio_resource_fails_before_rendering() {
    let mut out = output("no_audio.mp4");
    out.audio = Some("absent.wav".to_string());
    let job = RenderJob::new(scene(1.0, vec![static_rect_layer(1.0)]), out).unwrap();
    let out_path = job.output.out_path.clone();

    let mut ctl = PipelineController::new();
    let report = ctl
        .run(job, Arc::new(MemoryResourceLoader::new()))
        .unwrap_err();

    assert_eq!(report.stage, Stage::Validation);
    assert!(matches!(report.cause, FramewrightError::ResourceMissing(_)));
    assert_eq!(report.frames_completed, 0);
    assert!(!out_path.exists());
}
