//! Inode stability across copy-up.
//!
//! When a base-layer object is first mutated it is materialized into the
//! delta layer. Kernel-side inode caches hold the original inode number,
//! so the copied-up record must keep it: these tests pin `stat(p).ino`
//! across every mutating operation that can trigger a copy-up.

mod common;

use agentfs::FsError;
use common::{open_memory, seed_file};

#[test]
fn test_write_copyup_preserves_inode_and_content() {
    let fs = open_memory();
    let ino = seed_file(&fs, "/a.txt", 0o644, b"hello");

    fs.pwrite("/a.txt", 5, b" world").unwrap();

    let stats = fs.stat("/a.txt").unwrap();
    assert_eq!(stats.ino, ino, "inode must remain stable after write copy-up");
    assert_eq!(stats.size, 11);
    assert_eq!(fs.pread("/a.txt", 0, 11).unwrap(), b"hello world");
}

#[test]
fn test_overwrite_within_base_content() {
    let fs = open_memory();
    let ino = seed_file(&fs, "/b.txt", 0o644, b"xxxxxx");

    fs.pwrite("/b.txt", 2, b"YY").unwrap();

    assert_eq!(fs.stat("/b.txt").unwrap().ino, ino);
    assert_eq!(fs.read_file("/b.txt").unwrap(), b"xxYYxx");
}

#[test]
fn test_truncate_copyup() {
    let fs = open_memory();
    let ino = seed_file(&fs, "/trunc.txt", 0o644, b"0123456789abcdef");

    fs.truncate("/trunc.txt", 10).unwrap();
    let stats = fs.stat("/trunc.txt").unwrap();
    assert_eq!(stats.ino, ino, "inode must remain stable after truncate copy-up");
    assert_eq!(stats.size, 10);
    assert_eq!(fs.read_file("/trunc.txt").unwrap(), b"0123456789");

    // Truncate again, now already in the delta.
    fs.truncate("/trunc.txt", 5).unwrap();
    assert_eq!(fs.stat("/trunc.txt").unwrap().ino, ino);
    assert_eq!(fs.read_file("/trunc.txt").unwrap(), b"01234");
}

#[test]
fn test_truncate_extend_zero_fills() {
    let fs = open_memory();
    let ino = seed_file(&fs, "/grow.txt", 0o644, b"ab");

    fs.truncate("/grow.txt", 6).unwrap();
    assert_eq!(fs.stat("/grow.txt").unwrap().ino, ino);
    assert_eq!(fs.read_file("/grow.txt").unwrap(), b"ab\0\0\0\0");
}

#[test]
fn test_chmod_copyup() {
    let fs = open_memory();
    let ino = seed_file(&fs, "/b.txt", 0o644, b"content");

    fs.chmod("/b.txt", 0o755).unwrap();

    let stats = fs.stat("/b.txt").unwrap();
    assert_eq!(stats.ino, ino, "inode must remain stable after chmod copy-up");
    assert_eq!(stats.perm(), 0o755);
    assert!(stats.is_file(), "chmod must not clobber the file type bits");
}

#[test]
fn test_chown_copyup() {
    let fs = open_memory();
    let ino = seed_file(&fs, "/owned.txt", 0o644, b"content");

    fs.chown("/owned.txt", 501, 20).unwrap();

    let stats = fs.stat("/owned.txt").unwrap();
    assert_eq!(stats.ino, ino, "inode must remain stable after chown copy-up");
    assert_eq!(stats.uid, 501);
    assert_eq!(stats.gid, 20);
}

#[test]
fn test_utimes_copyup() {
    let fs = open_memory();
    let ino = seed_file(&fs, "/times.txt", 0o644, b"content");

    fs.utimes("/times.txt", 1_000_000_000, 1_000_000_001).unwrap();

    let stats = fs.stat("/times.txt").unwrap();
    assert_eq!(stats.ino, ino, "inode must remain stable after utimes copy-up");
    assert_eq!(stats.atime, 1_000_000_000);
    assert_eq!(stats.mtime, 1_000_000_001);
}

#[test]
fn test_rename_copyup() {
    let fs = open_memory();
    let ino = seed_file(&fs, "/old.txt", 0o644, b"content");

    fs.rename("/old.txt", "/new.txt").unwrap();

    assert!(matches!(fs.stat("/old.txt"), Err(FsError::NotFound)));
    let stats = fs.stat("/new.txt").unwrap();
    assert_eq!(stats.ino, ino, "inode must remain stable across rename copy-up");
    assert_eq!(fs.read_file("/new.txt").unwrap(), b"content");
}

#[test]
fn test_link_copyup() {
    let fs = open_memory();
    let ino = seed_file(&fs, "/orig.txt", 0o644, b"content");

    fs.link("/orig.txt", "/hard.txt").unwrap();

    let orig = fs.stat("/orig.txt").unwrap();
    let hard = fs.stat("/hard.txt").unwrap();
    assert_eq!(orig.ino, ino, "original inode must remain stable after link copy-up");
    assert_eq!(hard.ino, ino, "hard link must share the original inode");
    assert!(orig.nlink >= 2);

    // A second link still shares the id.
    fs.link("/orig.txt", "/hard2.txt").unwrap();
    assert_eq!(fs.stat("/hard2.txt").unwrap().ino, ino);
    assert_eq!(fs.lstat("/orig.txt").unwrap().ino, ino);

    // Dropping one name leaves the others intact.
    fs.unlink("/hard.txt").unwrap();
    assert_eq!(fs.stat("/orig.txt").unwrap().ino, ino);
    assert_eq!(fs.stat("/hard2.txt").unwrap().ino, ino);
    assert_eq!(fs.read_file("/hard2.txt").unwrap(), b"content");
}

#[test]
fn test_link_content_is_shared() {
    let fs = open_memory();
    seed_file(&fs, "/shared.txt", 0o644, b"before");

    fs.link("/shared.txt", "/alias.txt").unwrap();
    fs.write_file("/alias.txt", b"after").unwrap();

    assert_eq!(fs.read_file("/shared.txt").unwrap(), b"after");
}

#[test]
fn test_setxattr_copyup() {
    let fs = open_memory();
    let ino = seed_file(&fs, "/x.txt", 0o644, b"content");

    fs.setxattr("/x.txt", "user.test_attr", b"test_value").unwrap();

    assert_eq!(
        fs.stat("/x.txt").unwrap().ino,
        ino,
        "inode must remain stable after setxattr copy-up"
    );
    assert_eq!(fs.getxattr("/x.txt", "user.test_attr").unwrap(), b"test_value");

    fs.removexattr("/x.txt", "user.test_attr").unwrap();
    assert_eq!(fs.stat("/x.txt").unwrap().ino, ino);
    assert!(matches!(
        fs.getxattr("/x.txt", "user.test_attr"),
        Err(FsError::NotFound)
    ));
}

#[test]
fn test_base_xattrs_survive_copyup() {
    let fs = open_memory();
    fs.seed_base(|seed| {
        seed.file("/tagged.txt", 0o644, b"content")?;
        seed.xattr("/tagged.txt", "user.origin", b"seeded")?;
        Ok(())
    })
    .unwrap();

    // Trigger copy-up through an unrelated attribute write.
    fs.setxattr("/tagged.txt", "user.extra", b"new").unwrap();

    assert_eq!(fs.getxattr("/tagged.txt", "user.origin").unwrap(), b"seeded");
    let mut names = fs.listxattr("/tagged.txt").unwrap();
    names.sort();
    assert_eq!(names, vec!["user.extra", "user.origin"]);
}

#[test]
fn test_fallocate_copyup() {
    let fs = open_memory();
    let ino = seed_file(&fs, "/alloc.txt", 0o644, b"abc");

    fs.fallocate("/alloc.txt", 0, 1024).unwrap();

    let stats = fs.stat("/alloc.txt").unwrap();
    assert_eq!(stats.ino, ino, "inode must remain stable after fallocate copy-up");
    assert_eq!(stats.size, 1024);

    // Original bytes survive; the allocated tail reads as zeros.
    let data = fs.read_file("/alloc.txt").unwrap();
    assert_eq!(&data[..3], b"abc");
    assert!(data[3..].iter().all(|&b| b == 0));
}

#[test]
fn test_repeated_mutations_keep_inode() {
    let fs = open_memory();
    let ino = seed_file(&fs, "/multi.txt", 0o644, b"v1");

    fs.pwrite("/multi.txt", 0, b"v2").unwrap();
    fs.chmod("/multi.txt", 0o600).unwrap();
    fs.chown("/multi.txt", 1, 1).unwrap();
    fs.utimes("/multi.txt", 10, 20).unwrap();
    fs.setxattr("/multi.txt", "user.k", b"v").unwrap();
    fs.truncate("/multi.txt", 1).unwrap();
    fs.fallocate("/multi.txt", 0, 8).unwrap();

    assert_eq!(fs.stat("/multi.txt").unwrap().ino, ino);
}

#[test]
fn test_read_class_ops_do_not_copy_up() {
    let fs = open_memory();
    fs.seed_base(|seed| {
        seed.dir("/docs", 0o755)?;
        seed.file("/docs/a.txt", 0o644, b"hello")?;
        seed.symlink("/docs/ln", "a.txt")?;
        seed.xattr("/docs/a.txt", "user.k", b"v")?;
        Ok(())
    })
    .unwrap();

    let before = fs.statfs().unwrap();
    fs.stat("/docs/a.txt").unwrap();
    fs.lstat("/docs/ln").unwrap();
    fs.pread("/docs/a.txt", 0, 5).unwrap();
    fs.readdir("/docs").unwrap();
    fs.readlink("/docs/ln").unwrap();
    fs.getxattr("/docs/a.txt", "user.k").unwrap();
    let after = fs.statfs().unwrap();

    // No copies were materialized: same inode count, same content bytes.
    assert_eq!(before, after);
}

#[test]
fn test_unaffected_paths_keep_bindings() {
    let fs = open_memory();
    fs.seed_base(|seed| {
        seed.file("/steady.txt", 0o644, b"steady")?;
        seed.file("/moved.txt", 0o644, b"moved")?;
        Ok(())
    })
    .unwrap();
    let steady = fs.stat("/steady.txt").unwrap().ino;

    fs.rename("/moved.txt", "/elsewhere.txt").unwrap();
    fs.write_file("/new.txt", b"new").unwrap();

    assert_eq!(fs.stat("/steady.txt").unwrap().ino, steady);
}

#[test]
fn test_copyup_of_symlink_keeps_inode() {
    let fs = open_memory();
    fs.seed_base(|seed| {
        seed.file("/target.txt", 0o644, b"t")?;
        seed.symlink("/ln", "/target.txt")?;
        Ok(())
    })
    .unwrap();
    let ino = fs.lstat("/ln").unwrap().ino;

    // Renaming the symlink mutates it (source side of rename).
    fs.rename("/ln", "/ln2").unwrap();

    assert_eq!(fs.lstat("/ln2").unwrap().ino, ino);
    assert_eq!(fs.readlink("/ln2").unwrap(), "/target.txt");
}

#[test]
fn test_copyup_of_directory_keeps_inode_and_children() {
    let fs = open_memory();
    fs.seed_base(|seed| {
        seed.dir("/dir", 0o755)?;
        seed.file("/dir/child.txt", 0o644, b"c")?;
        Ok(())
    })
    .unwrap();
    let dir_ino = fs.stat("/dir").unwrap().ino;
    let child_ino = fs.stat("/dir/child.txt").unwrap().ino;

    // chmod on the directory copies up the record only.
    fs.chmod("/dir", 0o700).unwrap();

    assert_eq!(fs.stat("/dir").unwrap().ino, dir_ino);
    assert_eq!(fs.stat("/dir").unwrap().perm(), 0o700);
    // Base children still resolve through the copied-up directory.
    assert_eq!(fs.stat("/dir/child.txt").unwrap().ino, child_ino);
    assert_eq!(fs.read_file("/dir/child.txt").unwrap(), b"c");
}
