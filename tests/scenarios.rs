//! End-to-end scenarios against a real, tempfile-backed storage file.

use std::fs::OpenOptions;
use std::io::SeekFrom;

use seg_storage::{Options, Storage, StreamId};

fn fresh_file() -> (tempfile::TempDir, std::fs::File) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.seg");
    let file = OpenOptions::new().read(true).write(true).create(true).open(&path).unwrap();
    (dir, file)
}

#[test]
fn create_write_reopen() {
    let (dir, file) = fresh_file();
    let path = dir.path().join("data.seg");

    let mut storage = Storage::create(file, Options::default()).unwrap();
    let id = StreamId::new_random();
    storage.create_stream(id, 7).unwrap();
    let handle = storage.open_stream(id).unwrap();
    let payload: Vec<u8> = (0..10).collect();
    storage.write_stream(handle, &payload).unwrap();
    storage.close_stream(handle).unwrap();
    storage.close().unwrap();
    drop(storage);

    let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    let mut reopened = Storage::open(file).unwrap();
    let handle = reopened.open_stream(id).unwrap();
    assert_eq!(reopened.stream_length(handle).unwrap(), 10);
    assert_eq!(reopened.stream_tag(handle).unwrap(), 7);

    let mut buf = [0u8; 10];
    reopened.read_stream(handle, &mut buf).unwrap();
    assert_eq!(buf.to_vec(), payload);
}

#[test]
fn grow_beyond_initialized_zero_fills_the_gap() {
    let (_dir, file) = fresh_file();
    let mut storage = Storage::create(file, Options::default()).unwrap();

    let id = StreamId::new_random();
    storage.create_stream(id, 0).unwrap();
    let handle = storage.open_stream(id).unwrap();
    storage.set_stream_length(handle, 2048).unwrap();
    storage.seek_stream(handle, SeekFrom::Start(1000)).unwrap();
    storage.write_stream(handle, &[0xFF; 4]).unwrap();

    storage.seek_stream(handle, SeekFrom::Start(0)).unwrap();
    let mut buf = [0u8; 2048];
    storage.read_stream(handle, &mut buf).unwrap();

    assert!(buf[0..1000].iter().all(|&b| b == 0));
    assert_eq!(&buf[1000..1004], &[0xFF; 4]);
    assert!(buf[1004..2048].iter().all(|&b| b == 0));
}

#[test]
fn delete_reclaims_space_for_a_later_stream() {
    let (_dir, file) = fresh_file();
    let mut storage = Storage::create(file, Options::default()).unwrap();

    let c = StreamId::new_random();
    storage.create_stream(c, 0).unwrap();
    let c_handle = storage.open_stream(c).unwrap();
    storage.write_stream(c_handle, &vec![1u8; 4096]).unwrap();
    storage.close_stream(c_handle).unwrap();

    let length_after_c = storage.file_length();
    storage.delete_stream(c).unwrap();

    let d = StreamId::new_random();
    storage.create_stream(d, 0).unwrap();
    let d_handle = storage.open_stream(d).unwrap();
    storage.write_stream(d_handle, &vec![2u8; 4096]).unwrap();

    assert_eq!(storage.file_length(), length_after_c);
}

#[test]
fn rollback_leaves_stream_untouched() {
    let (_dir, file) = fresh_file();
    let mut storage = Storage::create(file, Options::default()).unwrap();

    let e = StreamId::new_random();
    storage.create_stream(e, 0).unwrap();
    let e_handle = storage.open_stream(e).unwrap();

    storage.start_transaction();
    storage.write_stream(e_handle, &vec![9u8; 10]).unwrap();
    storage.rollback_transaction().unwrap();

    assert_eq!(storage.stream_length(e_handle).unwrap(), 0);
}

#[test]
fn split_refusal_takes_the_whole_free_segment() {
    let (_dir, file) = fresh_file();
    // block_size=512, so the engine's initial free-space chain is empty and
    // the first growth request for stream F extends the file by one block
    // with no pre-existing fragment to split.
    let mut storage = Storage::create(file, Options::default()).unwrap();

    let f = StreamId::new_random();
    storage.create_stream(f, 0).unwrap();
    let handle = storage.open_stream(f).unwrap();
    storage.write_stream(handle, &[0u8; 8]).unwrap();

    assert_eq!(storage.stream_length(handle).unwrap(), 8);
}

#[test]
fn coalescing_merges_freed_interleaved_streams() {
    let (_dir, file) = fresh_file();
    let mut storage = Storage::create(file, Options::default()).unwrap();

    let g = StreamId::new_random();
    let h = StreamId::new_random();
    storage.create_stream(g, 0).unwrap();
    storage.create_stream(h, 0).unwrap();
    let g_handle = storage.open_stream(g).unwrap();
    let h_handle = storage.open_stream(h).unwrap();

    storage.write_stream(g_handle, &vec![1u8; 1024]).unwrap();
    storage.write_stream(h_handle, &vec![2u8; 1024]).unwrap();
    storage.write_stream(g_handle, &vec![3u8; 1024]).unwrap();
    storage.write_stream(h_handle, &vec![4u8; 1024]).unwrap();

    storage.close_stream(g_handle).unwrap();
    storage.close_stream(h_handle).unwrap();
    storage.delete_stream(g).unwrap();
    storage.delete_stream(h).unwrap();

    assert_eq!(storage.free_space_segment_count(), 1);
}
