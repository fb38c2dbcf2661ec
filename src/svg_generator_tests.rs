#[cfg(test)]
mod tests {
    use super::super::*;
    use quick_xml::events::Event;
    use quick_xml::Reader;

    const RED: Color = Color::new(255, 0, 0);
    const BLUE: Color = Color::new(0, 0, 255);

    fn square(x: u32, y: u32, size: u32, fill: Color) -> VectorPath {
        VectorPath {
            path_data: format!("M{x},{y}L{},{y}L{},{}L{x},{}Z", x + size, x + size, y + size, y + size),
            fill,
            complexity: 4.0,
            area: (size * size) as usize,
        }
    }

    fn palette() -> Palette {
        Palette::new([RED, BLUE])
    }

    /// Parses the whole document and returns the root's viewBox.
    fn parse(svg: &str) -> String {
        let mut reader = Reader::from_str(svg);
        let mut view_box = None;
        loop {
            match reader.read_event() {
                Ok(Event::Eof) => break,
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"svg" => {
                    let attr = e.try_get_attribute("viewBox").unwrap().unwrap();
                    view_box = Some(String::from_utf8(attr.value.to_vec()).unwrap());
                }
                Ok(_) => {}
                Err(e) => panic!("malformed svg: {e}"),
            }
        }
        view_box.expect("no <svg> root")
    }

    #[test]
    fn test_generate_empty_document() {
        let out = generate_svg(&[], 10, 20, &palette(), &SvgOptions::default()).unwrap();
        assert_eq!(parse(&out.content), "0 0 10 20");
        assert_eq!(out.path_count, 0);
        assert_eq!(out.color_count, 0);
        assert_eq!(out.vector_size, out.content.len() as u64);
        assert!(!out.content.contains("<path"));
    }

    #[test]
    fn test_group_by_color_first_appearance() {
        let paths = vec![square(0, 0, 5, RED), square(5, 0, 5, BLUE), square(0, 5, 5, RED)];
        let out = generate_svg(&paths, 10, 10, &palette(), &SvgOptions::default()).unwrap();
        assert_eq!(parse(&out.content), "0 0 10 10");
        assert_eq!(out.path_count, 3);
        assert_eq!(out.color_count, 2);
        assert_eq!(out.content.matches("<g").count(), 2);
        assert_eq!(out.content.matches("<path").count(), 3);
        let red = out.content.find("#ff0000").unwrap();
        let blue = out.content.find("#0000ff").unwrap();
        assert!(red < blue);
        assert!(out.content.contains("evenodd"));
    }

    #[test]
    fn test_ungrouped_paths_carry_fill() {
        let paths = vec![square(0, 0, 5, RED), square(5, 0, 5, BLUE)];
        let options = SvgOptions { group_by_color: false, ..Default::default() };
        let out = generate_svg(&paths, 10, 10, &palette(), &options).unwrap();
        parse(&out.content);
        assert!(!out.content.contains("<g"));
        assert_eq!(out.content.matches("fill=\"#").count(), 2);
        assert_eq!(out.path_count, 2);
    }

    #[test]
    fn test_precision_rounding() {
        let path = VectorPath {
            path_data: "M0.12345,1.98765L3.5,3L0,3.0001Z".to_string(),
            fill: RED,
            complexity: 3.0,
            area: 4,
        };
        let out = generate_svg(&[path.clone()], 4, 4, &palette(), &SvgOptions::default()).unwrap();
        assert!(out.content.contains("M0.12,1.99L3.5,3L0,3Z"), "{}", out.content);

        let coarse = SvgOptions { precision: 0, ..Default::default() };
        let out = generate_svg(&[path], 4, 4, &palette(), &coarse).unwrap();
        assert!(out.content.contains("M0,2L4,3L0,3Z"), "{}", out.content);
    }

    #[test]
    fn test_non_finite_coordinates_rejected() {
        for data in ["M0,NaNL1,1L0,1Z", "M0,0L1,infL0,1Z", "M0,0Lbogus,1Z"] {
            let path = VectorPath { path_data: data.to_string(), fill: RED, complexity: 3.0, area: 1 };
            match generate_svg(&[path], 2, 2, &palette(), &SvgOptions::default()) {
                Err(ConversionError::Generation(_)) => {}
                other => panic!("{data}: expected generation error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_background_and_stroke() {
        let paths = vec![square(0, 0, 2, BLUE), square(2, 0, 8, RED)];
        let options = SvgOptions { background: true, gap_fill_stroke: Some(0.5), ..Default::default() };
        let out = generate_svg(&paths, 10, 10, &palette(), &options).unwrap();
        parse(&out.content);
        let rect = out.content.find("<rect").unwrap();
        let rect_end = rect + out.content[rect..].find('>').unwrap();
        assert!(out.content[rect..rect_end].contains("fill=\"#ff0000\""));
        assert!(rect < out.content.find("<g").unwrap());
        assert!(out.content.contains("stroke-width=\"0.5\""));
        assert!(out.content.contains("stroke-linejoin=\"round\""));
    }

    #[test]
    fn test_options_for_config() {
        let low = VectorizationConfig { smoothing_level: SmoothingLevel::Low, ..Default::default() };
        assert_eq!(SvgOptions::for_config(&low).gap_fill_stroke, None);
        assert_eq!(SvgOptions::for_config(&VectorizationConfig::default()).gap_fill_stroke, Some(0.5));
    }

    #[test]
    fn test_fallback_embeds_raster() {
        let bytes = b"\x89PNG fake payload".to_vec();
        let out = generate_fallback_svg(&bytes, RasterFormat::Png, 3, 2).unwrap();
        assert_eq!(parse(&out.content), "0 0 3 2");
        let encoded = STANDARD.encode(&bytes);
        assert!(out.content.contains(&format!("data:image/png;base64,{encoded}")));
        assert!(out.content.contains("<image"));
        assert_eq!(out.path_count, 0);

        let jpeg = generate_fallback_svg(&bytes, RasterFormat::Jpeg, 1, 1).unwrap();
        assert!(jpeg.content.contains("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_fallback_needs_dimensions() {
        assert!(generate_fallback_svg(b"x", RasterFormat::Png, 0, 5).is_err());
    }

    #[test]
    fn test_normalize_keeps_structure() {
        assert_eq!(normalize_path_data("M1,2C3.333,4 5,6 7,8Z", 1).unwrap(), "M1,2C3.3,4 5,6 7,8Z");
        assert_eq!(normalize_path_data("M-1.5,2L1e1,0Z", 2).unwrap(), "M-1.5,2L10,0Z");
        assert_eq!(normalize_path_data("", 2).unwrap(), "");
    }
}
