#![allow(dead_code)]

use actix_web::http::header::CONTENT_TYPE;
use actix_web::test::TestRequest;
use async_trait::async_trait;
use chrono::NaiveDate;
use fashion_backend::inference::{
    BoundingBox, Detection, Detector, DetectorSet, FeatureExtractor, InferenceError,
};
use fashion_backend::trends::{FetchError, TrendPoint, TrendSource};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::{Array4, ArrayD, Axis};
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::Arc;

pub const BOUNDARY: &str = "----fashion-test-boundary";

pub enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        write!(body, "--{BOUNDARY}\r\n").unwrap();
        match part {
            Part::Text(name, value) => {
                write!(
                    body,
                    "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .unwrap();
            }
            Part::File(name, filename, bytes) => {
                write!(
                    body,
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .unwrap();
                body.extend_from_slice(bytes);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    write!(body, "--{BOUNDARY}--\r\n").unwrap();
    body
}

pub fn multipart_request(uri: &str, parts: &[Part<'_>]) -> TestRequest {
    TestRequest::post()
        .uri(uri)
        .insert_header((
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(multipart_body(parts))
}

pub fn png_bytes(color: [u8; 3]) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(24, 24, Rgb(color)))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub struct FixedDetector(pub Vec<&'static str>);

impl Detector for FixedDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<Detection>, InferenceError> {
        Ok(self
            .0
            .iter()
            .enumerate()
            .map(|(class_id, label)| Detection {
                class_id,
                label: label.to_string(),
                confidence: 0.8,
                bbox: BoundingBox {
                    x1: 2.0,
                    y1: 2.0,
                    x2: 12.0,
                    y2: 12.0,
                },
            })
            .collect())
    }
}

pub fn detectors() -> DetectorSet {
    DetectorSet {
        garment: Arc::new(FixedDetector(vec!["shirt"])),
        color: Arc::new(FixedDetector(vec!["white", "black"])),
        pattern: Arc::new(FixedDetector(vec!["solid"])),
    }
}

/// Per-channel means as the embedding.
pub struct ChannelMeanExtractor;

impl FeatureExtractor for ChannelMeanExtractor {
    fn extract(&self, input: Array4<f32>) -> Result<ArrayD<f32>, InferenceError> {
        let means = input
            .index_axis(Axis(0), 0)
            .mean_axis(Axis(2))
            .and_then(|m| m.mean_axis(Axis(1)))
            .ok_or_else(|| InferenceError::Model("empty input".into()))?;
        Ok(means.into_dyn())
    }
}

pub struct CannedTrends(pub HashMap<String, Vec<TrendPoint>>);

#[async_trait]
impl TrendSource for CannedTrends {
    async fn fetch(&self, keyword: &str) -> Result<Vec<TrendPoint>, FetchError> {
        self.0.get(keyword).cloned().ok_or(FetchError::Status(400))
    }
}

/// Two years of monthly points peaking in December and bottoming in June.
pub fn seasonal_points() -> Vec<TrendPoint> {
    let mut points = Vec::new();
    for year in [2022, 2023] {
        for month in 1..=12u32 {
            let value = match month {
                12 => 90.0,
                6 => 10.0,
                _ => 50.0,
            };
            points.push(TrendPoint {
                date: NaiveDate::from_ymd_opt(year, month, 1).unwrap(),
                value,
            });
        }
    }
    points
}
