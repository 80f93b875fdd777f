use crate::channels::cursor::cursor_data_size;
use crate::channels::display::{parse_brush, parse_display_base, parse_image_at, Brush};
use crate::channels::inputs::{key_down_code, key_up_code, motion_deltas};
use crate::channels::MouseButton;
use crate::protocol::*;
use crate::wire_format::ByteReader;

#[test]
fn plain_scancodes_pass_through() {
    assert_eq!(key_down_code(0x1E), 0x1E);
    assert_eq!(key_up_code(0x1E), 0x9E);
}

#[test]
fn extended_scancodes_gain_the_e0_prefix() {
    // 0x147 is Home on the extended set.
    assert_eq!(key_down_code(0x147), 0xe0 | (0x47 << 8));
    assert_eq!(key_up_code(0x147), 0x80e0 | (0x47 << 8));
}

#[test]
fn key_up_of_a_down_code_sets_the_break_bit() {
    for code in [0x01u32, 0x1C, 0x39, 0xFF] {
        assert_eq!(key_up_code(code), code | 0x80);
    }
}

#[test]
fn motion_splits_into_clamped_packets() {
    assert_eq!(motion_deltas(300, -5), vec![(127, -5), (127, 0), (46, 0)]);
}

#[test]
fn motion_of_zero_produces_no_packets() {
    assert!(motion_deltas(0, 0).is_empty());
}

#[test]
fn motion_deltas_sum_to_the_input_and_stay_clamped() {
    for &(x, y) in &[
        (1, 1),
        (-300, 5),
        (127, 127),
        (128, -128),
        (10000, -10000),
        (-9999, 1),
    ] {
        let deltas = motion_deltas(x, y);
        let expected = ((x.abs().max(y.abs()) + 126) / 127) as usize;
        assert_eq!(deltas.len(), expected, "packet count for ({x}, {y})");
        assert_eq!(deltas.iter().map(|d| d.0).sum::<i32>(), x);
        assert_eq!(deltas.iter().map(|d| d.1).sum::<i32>(), y);
        for (dx, dy) in deltas {
            assert!(dx.abs() <= 127 && dy.abs() <= 127);
        }
    }
}

#[test]
fn button_masks_track_pressed_buttons() {
    let mut state = 0u16;
    for button in [MouseButton::Left, MouseButton::Right, MouseButton::Side] {
        state |= button.mask();
    }
    assert_eq!(
        state,
        SPICE_MOUSE_BUTTON_MASK_LEFT | SPICE_MOUSE_BUTTON_MASK_RIGHT | SPICE_MOUSE_BUTTON_MASK_SIDE
    );

    state &= !MouseButton::Right.mask();
    assert_eq!(
        state,
        SPICE_MOUSE_BUTTON_MASK_LEFT | SPICE_MOUSE_BUTTON_MASK_SIDE
    );

    // Wheel events carry no state bit.
    assert_eq!(MouseButton::WheelUp.mask(), 0);
    assert_eq!(MouseButton::WheelDown.mask(), 0);
}

fn push_rect(buf: &mut Vec<u8>, top: i32, left: i32, bottom: i32, right: i32) {
    for v in [top, left, bottom, right] {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

#[test]
fn display_base_parses_box_and_skips_clip_rects() {
    let mut payload = Vec::new();
    payload.extend_from_slice(&3u32.to_le_bytes());
    push_rect(&mut payload, 10, 20, 110, 220);
    payload.push(SPICE_CLIP_TYPE_RECTS);
    payload.extend_from_slice(&2u32.to_le_bytes());
    push_rect(&mut payload, 0, 0, 1, 1);
    push_rect(&mut payload, 2, 2, 3, 3);
    payload.push(0xEE); // first byte after the clip

    let mut r = ByteReader::new(&payload);
    let base = parse_display_base(&mut r).unwrap();
    assert_eq!(base.surface_id, 3);
    assert_eq!(base.rect.right - base.rect.left, 200);
    assert_eq!(base.rect.bottom - base.rect.top, 100);
    assert_eq!(r.read_u8().unwrap(), 0xEE);
}

#[test]
fn solid_brush_parses_color() {
    let mut payload = vec![SPICE_BRUSH_TYPE_SOLID];
    payload.extend_from_slice(&0x00AABBCCu32.to_le_bytes());

    let mut r = ByteReader::new(&payload);
    match parse_brush(&mut r).unwrap() {
        Brush::Solid(color) => assert_eq!(color, 0x00AABBCC),
        other => panic!("expected a solid brush, got {other:?}"),
    }
}

#[test]
fn unknown_brush_type_is_an_error() {
    let payload = [9u8];
    let mut r = ByteReader::new(&payload);
    assert!(parse_brush(&mut r).is_err());
}

#[test]
fn bitmap_image_resolves_at_offset() {
    let offset = 32usize;
    let pixels: Vec<u8> = (0..32).collect();

    let mut payload = vec![0u8; offset];
    payload.extend_from_slice(&1u64.to_le_bytes()); // descriptor id
    payload.push(SPICE_IMAGE_TYPE_BITMAP);
    payload.push(0); // descriptor flags
    payload.extend_from_slice(&4u32.to_le_bytes()); // descriptor width
    payload.extend_from_slice(&2u32.to_le_bytes()); // descriptor height
    payload.push(32); // bitmap format
    payload.push(SPICE_BITMAP_FLAGS_TOP_DOWN);
    payload.extend_from_slice(&4u32.to_le_bytes()); // width
    payload.extend_from_slice(&2u32.to_le_bytes()); // height
    payload.extend_from_slice(&16u32.to_le_bytes()); // stride
    payload.extend_from_slice(&0u32.to_le_bytes()); // no palette
    payload.extend_from_slice(&pixels);

    let bitmap = parse_image_at(&payload, offset)
        .unwrap()
        .expect("bitmap image should resolve");
    assert_eq!(bitmap.width, 4);
    assert_eq!(bitmap.height, 2);
    assert_eq!(bitmap.stride, 16);
    assert_ne!(bitmap.flags & SPICE_BITMAP_FLAGS_TOP_DOWN, 0);
    assert_eq!(bitmap.data, &pixels[..]);
}

#[test]
fn compressed_image_types_do_not_resolve() {
    let mut payload = Vec::new();
    payload.extend_from_slice(&1u64.to_le_bytes());
    payload.push(1); // QUIC
    payload.push(0);
    payload.extend_from_slice(&4u32.to_le_bytes());
    payload.extend_from_slice(&2u32.to_le_bytes());

    assert!(parse_image_at(&payload, 0).unwrap().is_none());
}

#[test]
fn image_offset_out_of_bounds_is_an_error() {
    assert!(parse_image_at(&[0u8; 8], 64).is_err());
}

#[test]
fn cursor_buffer_sizes_by_type() {
    assert_eq!(cursor_data_size(SPICE_CURSOR_TYPE_ALPHA, 32, 32), Some(4 * 32 * 32));
    assert_eq!(cursor_data_size(SPICE_CURSOR_TYPE_MONO, 32, 32), Some(2 * 4 * 32));
    // Widths that are not a byte multiple round the mask stride up.
    assert_eq!(cursor_data_size(SPICE_CURSOR_TYPE_MONO, 33, 4), Some(2 * 5 * 4));
    assert_eq!(
        cursor_data_size(SPICE_CURSOR_TYPE_COLOR32, 16, 16),
        Some(4 * 16 * 16 + 2 * 16)
    );
    assert_eq!(
        cursor_data_size(SPICE_CURSOR_TYPE_COLOR8, 16, 16),
        Some(16 * 16 + 256 * 4 + 2 * 16)
    );
    assert_eq!(cursor_data_size(0xFF, 4, 4), None);
}
