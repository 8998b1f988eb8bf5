mod common;
use common::*;

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use usb_msc_test::{
    page_size, report::scale, run_test, BoundaryPolicy, Catalog, Context, Error, MemTarget, Result, TestCase, TestId,
};

const CAPACITY: usize = 16 * SIZE;

#[test]
fn simple_repeats_at_start() {
    let page = page_size();
    let target = MemTarget::new(CAPACITY, 512);
    let (mut ctx, output) = context(target.clone(), &config(page, 3));

    run_test(&mut ctx, 0).unwrap();

    assert_eq!(ctx.transferred(), 3 * page as u64);
    assert_eq!(target.writes(), vec![(0, page); 3]);
    assert_eq!(target.reads(), vec![(0, page); 3]);
    assert!(target.contents()[..page].iter().all(|&b| b == 0x55));
    assert!(target.contents()[page..].iter().all(|&b| b == 0));

    let (amount, unit) = scale(3 * page as u64);
    let text = output.text();
    println!("{text}");
    assert!(text.contains(&format!("test  0: sent {amount:10.1} {unit:>2}")), "{text}");
    assert!(text.ends_with("success\n"), "{text}");
    assert_eq!(ctx.read_throughput().samples(), 3);
    assert_eq!(ctx.write_throughput().samples(), 3);
}

#[test]
fn sector_counts() {
    for (id, sectors) in [(1, 1), (2, 8), (3, 32), (4, 64)] {
        let target = MemTarget::new(CAPACITY, 512);
        let (mut ctx, _) = context(target.clone(), &config(SIZE, 2));

        run_test(&mut ctx, id).unwrap();

        assert_eq!(target.writes(), vec![(0, sectors * 512); 2], "test {id}");
        assert_eq!(ctx.transferred(), 2 * sectors as u64 * 512, "test {id}");
    }
}

#[test]
fn scatter_gather_is_one_call_per_side() {
    for (id, sectors) in [(5, 2), (6, 8), (7, 32), (8, 64), (9, 128)] {
        let target = MemTarget::new(CAPACITY, 512);
        let (mut ctx, output) = context(target.clone(), &config(SIZE, 3));

        run_test(&mut ctx, id).unwrap();

        assert_eq!(target.writes(), vec![(0, sectors * 512); 3], "test {id}");
        assert_eq!(target.reads(), vec![(0, sectors * 512); 3], "test {id}");
        assert!(output.text().ends_with("success\n"));
    }
}

#[test]
fn scatter_gather_random() {
    for id in [TestId::SgRandomRead, TestId::SgRandomWrite, TestId::SgRandomBoth] {
        let target = MemTarget::new(CAPACITY, 512);
        let (mut ctx, _) = context(target.clone(), &config(SIZE, 2));

        run_test(&mut ctx, id.number()).unwrap();

        assert_eq!(target.writes(), vec![(0, 128 * 512); 2], "{id}");
        assert_eq!(target.reads(), vec![(0, 128 * 512); 2], "{id}");
        assert_eq!(ctx.transferred(), 2 * 128 * 512);
    }
}

#[test]
fn scatter_gather_needs_buffer_for_all_sectors() {
    let target = MemTarget::new(CAPACITY, 4096);
    let (mut ctx, output) = context(target.clone(), &config(SIZE, 1));

    let err = run_test(&mut ctx, TestId::Sg128.number()).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)), "{err}");
    assert!(target.writes().is_empty());
    assert!(output.text().ends_with("failed\n"));
}

#[test]
fn write_past_last_is_rejected() {
    let page = page_size();
    let target = MemTarget::new(CAPACITY, 512);
    let (mut ctx, output) = context(target.clone(), &config(page, 2));

    run_test(&mut ctx, TestId::WritePastLast.number()).unwrap();

    let offset = (CAPACITY - page + 512) as u64;
    assert_eq!(target.writes(), vec![(offset, page - 512); 2]);
    assert_eq!(ctx.transferred(), 0);
    assert!(output.text().ends_with("success\n"));
}

#[test]
fn write_past_last_accepted() {
    let page = page_size();
    let target = Oversized::new(CAPACITY, SIZE);
    let (mut ctx, output) = context(target, &config(page, 5));

    match run_test(&mut ctx, TestId::WritePastLast.number()) {
        Err(Error::UnexpectedSuccess { op: "write", offset }) => {
            assert_eq!(offset, (CAPACITY - page + 512) as u64)
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert!(output.text().ends_with("failed\n"));
}

#[test]
fn read_past_last_lenient() {
    let page = page_size();
    let target = MemTarget::new(CAPACITY, 512);
    let (mut ctx, _) = context(target.clone(), &config(page, 3));
    assert_eq!(ctx.boundary_policy(), BoundaryPolicy::Lenient);

    run_test(&mut ctx, TestId::ReadPastLast.number()).unwrap();

    assert!(target.writes().is_empty());
    assert_eq!(ctx.transferred(), 0);
}

#[test]
fn read_past_last_strict() {
    let page = page_size();
    let target = MemTarget::new(CAPACITY, 512);
    let mut config = config(page, 3);
    config.boundary = BoundaryPolicy::Strict;
    let (mut ctx, _) = context(target, &config);

    let err = run_test(&mut ctx, TestId::ReadPastLast.number()).unwrap_err();
    assert!(matches!(err, Error::UnexpectedSuccess { op: "read", .. }), "{err}");
}

#[test]
fn read_past_last_accepted() {
    let target = Oversized::new(CAPACITY, SIZE);
    let (mut ctx, _) = context(target, &config(page_size(), 1));

    let err = run_test(&mut ctx, TestId::ReadPastLast.number()).unwrap_err();
    assert!(matches!(err, Error::UnexpectedSuccess { op: "read", .. }), "{err}");
}

#[test]
fn lseek_past_last() {
    let target = MemTarget::new(CAPACITY, 512);
    let (mut ctx, output) = context(target.clone(), &config(SIZE, 4));

    run_test(&mut ctx, TestId::LseekPastLast.number()).unwrap();
    assert!(target.writes().is_empty());
    assert!(target.reads().is_empty());
    assert!(output.text().ends_with("success\n"));

    let target = Oversized::new(CAPACITY, SIZE);
    let (mut ctx, _) = context(target, &config(SIZE, 4));
    match run_test(&mut ctx, TestId::LseekPastLast.number()) {
        Err(Error::UnexpectedSuccess { op: "seek", offset }) => assert_eq!(offset, CAPACITY as u64 + 512),
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn patterns() {
    let page = page_size();
    let target = MemTarget::new(CAPACITY, 512);
    let mut config = config(page, 2);
    config.pattern = 2;
    let (mut ctx, _) = context(target.clone(), &config);
    assert_eq!(ctx.pattern_byte(), 0x22);

    run_test(&mut ctx, TestId::Patterns.number()).unwrap();

    assert!(target.contents()[..page].iter().all(|&b| b == 0x22));
    assert!(ctx.tx().iter().all(|&b| b == 0x22));
}

#[test]
fn corruption_is_detected() {
    let page = page_size();
    let target = MemTarget::new(CAPACITY, 512);
    target.corrupt_reads_at(100);
    let mut config = config(page, 5);
    config.pattern = 2;
    let (mut ctx, output) = context(target.clone(), &config);

    match run_test(&mut ctx, TestId::Patterns.number()) {
        Err(Error::Verification { offset: 100, expected: 0x22, actual: 0xdd }) => (),
        other => panic!("unexpected result {other:?}"),
    }

    assert_eq!(target.writes().len(), 1);
    assert!(output.text().ends_with("failed\n"));
}

#[test]
fn corrupted_iteration_is_not_counted() {
    let page = page_size();
    let target = MemTarget::new(CAPACITY, 512);
    let (mut ctx, _) = context(target.clone(), &config(page, 3));

    run_test(&mut ctx, TestId::Simple.number()).unwrap();
    assert_eq!(ctx.transferred(), 3 * page as u64);

    target.corrupt_reads_at(100);
    ctx.seek_to(0).unwrap();
    let err = run_test(&mut ctx, TestId::Simple.number()).unwrap_err();
    assert!(matches!(err, Error::Verification { offset: 100, .. }), "{err}");
    assert_eq!(ctx.transferred(), 3 * page as u64);
    assert_eq!(ctx.read_throughput().samples(), 4);
}

#[test]
fn unsupported_tests() {
    for number in [16, 17, 99] {
        let target = MemTarget::new(CAPACITY, 512);
        let (mut ctx, output) = context(target.clone(), &config(SIZE, 1));

        let err = run_test(&mut ctx, number).unwrap_err();
        assert!(matches!(err, Error::UnsupportedTest(n) if n == number));
        assert_eq!(err.exit_code(), libc::ENOTSUP);
        assert_eq!(output.text(), format!("test {number} is not supported\nfailed\n"));
        assert!(target.writes().is_empty());
    }
}

#[test]
fn whole_catalog() {
    let catalog = Catalog::standard();
    for entry in catalog.iter() {
        let target = MemTarget::new(CAPACITY, 512);
        let (mut ctx, output) = context(target, &config(SIZE, 2));

        catalog.run(&mut ctx, entry.id().number()).unwrap_or_else(|err| panic!("test {} failed: {err}", entry.id()));
        assert!(output.text().ends_with("success\n"));
    }
}

#[derive(Debug, Default)]
struct Counting(Arc<AtomicU32>);

impl TestCase for Counting {
    fn run(&self, ctx: &mut Context, id: TestId) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        ctx.report(id, true);
        Ok(())
    }
}

#[test]
fn custom_case() {
    let runs = Arc::new(AtomicU32::new(0));
    let catalog = Catalog::standard().with(TestId::Patterns, Counting(runs.clone()));
    assert_eq!(catalog.len(), 17);

    let target = MemTarget::new(CAPACITY, 512);
    let (mut ctx, _) = context(target.clone(), &config(SIZE, 1));
    catalog.run(&mut ctx, TestId::Patterns.number()).unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(target.writes().is_empty());
}

#[test]
fn progress_can_be_disabled() {
    let target = MemTarget::new(CAPACITY, 512);
    let mut config = config(page_size(), 2);
    config.progress = false;
    let (mut ctx, output) = context(target, &config);

    run_test(&mut ctx, 0).unwrap();
    assert_eq!(output.text(), "success\n");
}

#[test]
fn round_trip_after_boundary_test_starts_over() {
    let page = page_size();
    let target = MemTarget::new(CAPACITY, 512);
    let (mut ctx, _) = context(target.clone(), &config(page, 2));

    run_test(&mut ctx, TestId::ReadPastLast.number()).unwrap();
    assert_eq!(ctx.offset(), CAPACITY as u64);

    run_test(&mut ctx, TestId::Simple.number()).unwrap();
    assert_eq!(target.writes(), vec![(0, page); 2]);
}
