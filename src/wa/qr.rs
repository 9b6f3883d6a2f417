use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::Luma;
use qrcode::QrCode;

/// Encodes a QR pairing payload as a PNG data URL for API consumers.
pub fn render_qr_png_data_url(qr_payload: &str) -> Result<String, String> {
    let code = QrCode::new(qr_payload.as_bytes()).map_err(|error| error.to_string())?;
    let rendered = code.render::<Luma<u8>>().min_dimensions(240, 240).build();

    let mut png = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut png);
    image::ImageEncoder::write_image(
        encoder,
        &rendered,
        rendered.width(),
        rendered.height(),
        image::ExtendedColorType::L8,
    )
    .map_err(|error| error.to_string())?;

    Ok(format!("data:image/png;base64,{}", STANDARD.encode(&png)))
}
