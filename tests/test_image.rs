use tomasim::image::{ImageError, MemImage};
use tomasim::miu::Ram;

mod common;

#[test]
fn test_words_are_byte_reversed() {
    // The first two hex digits are the byte at the lowest address, so the
    // textual group "13 05 F0 0F" is the word 0x0ff00513.
    let image = "1305F00F".parse::<MemImage>().unwrap();
    assert_eq!(image.words, vec![(0, 0x0ff0_0513)]);

    let mut ram = Ram::new();
    image.apply(&mut ram);
    assert_eq!(ram.read(0, 4), 0x0ff0_0513);
    assert_eq!(ram.read(0, 1), 0x13);
    assert_eq!(ram.read(3, 1), 0x0f);
}

#[test]
fn test_cursor_advances_by_word() {
    let image = "11223344 55667788".parse::<MemImage>().unwrap();
    assert_eq!(
        image.words,
        vec![(0, 0x44332211), (4, 0x88776655)]
    );
}

#[test]
fn test_at_token_moves_cursor() {
    let image = "@00000100\nAABBCCDD\n@00000010 00112233"
        .parse::<MemImage>()
        .unwrap();
    assert_eq!(
        image.words,
        vec![(0x100, 0xddccbbaa), (0x10, 0x33221100)]
    );
}

#[test]
fn test_word_split_across_whitespace() {
    // Byte-per-token dumps are the common case.
    let image = "13 05\nF0 0F".parse::<MemImage>().unwrap();
    assert_eq!(image.words, vec![(0, 0x0ff0_0513)]);
}

#[test]
fn test_case_insensitive_hex() {
    let a = "aabbccdd".parse::<MemImage>().unwrap();
    let b = "AABBCCDD".parse::<MemImage>().unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_bad_character_rejected() {
    assert_eq!(
        "1234567G".parse::<MemImage>(),
        Err(ImageError::BadChar('G'))
    );
    assert_eq!("12@".parse::<MemImage>(), Err(ImageError::BadChar('@')));
}

#[test]
fn test_truncated_tokens_rejected() {
    assert_eq!(
        "@1234".parse::<MemImage>(),
        Err(ImageError::TruncatedAddress)
    );
    assert_eq!("123456".parse::<MemImage>(), Err(ImageError::TruncatedWord));
}

#[test]
fn test_out_of_range_rejected() {
    assert_eq!(
        "@FFFFFFFC 11223344".parse::<MemImage>(),
        Err(ImageError::OutOfRange(0xfffffffc)),
    );
    // The last in-bounds word is fine; the next one crosses the limit.
    assert_eq!(
        "@003FFFFC 11223344 55667788".parse::<MemImage>(),
        Err(ImageError::OutOfRange(0x400000)),
    );
}

#[test]
fn test_harness_roundtrip() {
    // The test harness encodes words so that the loader reproduces them.
    let words = [common::addi(10, 0, 42), common::HALT];
    let image = common::hex_image(&words).parse::<MemImage>().unwrap();
    assert_eq!(image.words, vec![(0, words[0]), (4, words[1])]);
}
