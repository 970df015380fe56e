use gluewave_common::clock::FixedTimeSource;
use gluewave_provenance::qr;
use gluewave_provenance::{
    content_hash_hex, mint_record, open_packs, scan_frames, MemoryFrameSampler, MintPack,
    MintRequest, Preview, QrPayload, RqrrDecoder, Volumes,
};
use image::{Rgba, RgbaImage};

fn recorded_payload() -> QrPayload {
    let time = FixedTimeSource::new("2024-01-01T00:00:00.000Z", "123");
    QrPayload::generate(
        "T",
        Volumes {
            big: 0.7,
            small: 0.3,
            master: 0.4,
        },
        &time,
    )
}

/// A frame the way the compositor lays it out: QR near the top-left corner.
fn burned_frame(text: &str) -> RgbaImage {
    let mut frame = RgbaImage::from_pixel(1280, 720, Rgba([24, 32, 48, 255]));
    let raster = qr::rasterize(text).expect("payload should rasterize");
    let module_px = qr::module_scale(&raster, (1280.0 * 0.14) as u32);
    let scaled = qr::scale_crisp(&raster, module_px);
    image::imageops::overlay(&mut frame, &scaled, 16, 48);
    frame
}

#[test]
fn recorded_take_survives_scan_mint_and_pack() {
    let payload = recorded_payload();
    assert_eq!(payload.id, "gw-123");
    let text = payload.to_qr_text().expect("payload should serialize");

    let mut sampler = MemoryFrameSampler::new(Some(4.0));
    sampler.push(0.0, burned_frame(&text));

    let scanned = scan_frames(&mut sampler, &RqrrDecoder)
        .expect("memory sampler never fails")
        .expect("burned QR should be found");
    assert_eq!(scanned.payload, payload);
    assert_eq!(scanned.found_at_secs, 0.15);

    let video = b"not really a webm, but the hash does not care".to_vec();
    let request = MintRequest {
        video: &video,
        file_name: "take.webm".to_string(),
        duration_secs: 4.0,
        mood: "bright".to_string(),
        intention: Some("focus".to_string()),
    };
    let meta = mint_record(&request, &scanned);
    assert_eq!(meta.id, "gw-123");
    assert_eq!(meta.volumes, Some(payload.volumes));
    assert_eq!(meta.source.content_hash_hex, content_hash_hex(&video));

    let pack = MintPack::new(meta.clone(), Some(video.clone()));
    let bytes = pack.to_bytes().expect("pack should serialize");

    let opened = open_packs(vec![("whatever.zip".to_string(), bytes)]);
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].pack.meta, meta);
    assert_eq!(opened[0].pack.video.as_deref(), Some(video.as_slice()));
    assert_eq!(opened[0].summary().preview, Preview::Available);
    assert_eq!(opened[0].pack.file_name(), "gw-123.gwpack");
}

#[test]
fn embedded_text_parses_back_to_the_same_payload() {
    let payload = recorded_payload();
    let text = payload.to_qr_text().expect("payload should serialize");
    assert_eq!(
        text,
        r#"{"v":"0.1","id":"gw-123","createdAt":"2024-01-01T00:00:00.000Z","title":"T","volumes":{"big":0.7,"small":0.3,"master":0.4}}"#
    );
    assert_eq!(QrPayload::parse(&text), Some(payload));
}
