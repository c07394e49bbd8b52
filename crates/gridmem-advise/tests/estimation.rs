//! Integration tests driving the full pipeline: catalogue ingest,
//! launch analysis and outcome collection.

use std::collections::HashMap;

use gridmem_advise::{
    rank_allocations, AccessOutcome, AccessRow, ArgValue, Bound, Catalogue, ConstFolder,
    DimValue, Estimator, Evaluator, InvocationRecord, LoopRow, Scalar, VecSink, WorkingSet,
};
use gridmem_expr::{build_postfix, BuildConfig};

fn toks(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_owned).collect()
}

fn launch(kernel: &str) -> InvocationRecord {
    let mut inv = InvocationRecord::new(0, kernel);
    inv.grid[0] = DimValue::Const(4);
    inv.block[0] = DimValue::Const(256);
    inv
}

/// A strided copy: `a[gid + i * 100]` inside `for i in 0..arg2`.
fn strided_catalogue() -> Catalogue {
    let mut cat = Catalogue::new();
    cat.add_loop(&LoopRow {
        kernel: "copy".into(),
        loop_id: 1,
        parent_loop_id: 0,
        init_tokens: toks("0"),
        final_tokens: toks("ARG2"),
        step_tokens: toks("1"),
        known_iters: None,
    })
    .unwrap();
    cat.add_phi_loop("copy", 1, 1);
    cat.add_access(&AccessRow {
        kernel: "copy".into(),
        access_id: 1,
        alloc_arg: 0,
        loop_id: 1,
        cond_id: 0,
        postfix_tokens: toks("TIDX BIDX BDIMX MUL ADD PHI1 ARG3 ADD 0 PHI1 ADD"),
        prefix_tokens: toks(
            "( GEP ( ADD ( ADD TIDX ( MUL BIDX BDIMX ) ) ( PHI1 0 ( ADD PHI1 ARG3 ) ) ) )",
        ),
    });
    cat
}

/// Full numbers for a loop-strided access over a 4x256 launch.
#[test]
fn test_strided_access_estimate() {
    let cat = strided_catalogue();
    let mut inv = launch("copy");
    inv.bind_arg(2, ArgValue::Const(10));
    inv.bind_arg(3, ArgValue::Const(100));

    let mut sink = VecSink::default();
    let mut em = ConstFolder::new();
    Estimator::new(&cat).analyze_invocation(&inv, &mut em, &mut sink).unwrap();

    assert_eq!(sink.loops, vec![(0, 1, Some(Scalar::Imm(10)))]);
    assert_eq!(sink.accesses.len(), 1);
    let AccessOutcome::Estimate(est) = &sink.accesses[0].1 else {
        panic!("expected an estimate, got {:?}", sink.accesses[0].1);
    };

    // 4 blocks x 256 threads x 10 iterations.
    assert_eq!(est.exec_count, Some(Scalar::Imm(10240)));
    // Grid span 1023 plus 10 iterations of stride 100.
    assert_eq!(est.working_set, WorkingSet::Span(Scalar::Imm(1023 + 1000)));
    assert_eq!(est.stride_bidx, Some(Scalar::Imm(256)));
    assert_eq!(est.stride_phi, Some(Scalar::Imm(100)));
}

/// The largest value never undercuts the smallest, whatever the shape.
#[test]
fn test_upper_bound_dominates_lower() {
    let cat = strided_catalogue();
    let mut inv = launch("copy");
    inv.bind_arg(2, ArgValue::Const(10));
    inv.bind_arg(3, ArgValue::Const(100));
    let kernel = cat.kernel("copy").unwrap();
    let ev = Evaluator::new(kernel, &inv);
    let mut em = ConstFolder::new();

    for expr in [
        "TIDX BIDX BDIMX MUL ADD",
        "TIDX 4 MUL ARG3 ADD",
        "BIDX 8 SHL",
        "TIDX ARG3 ADD 2 SDIV",
    ] {
        let tokens = toks(expr);
        let tree = build_postfix(&tokens, &BuildConfig::default()).unwrap().unwrap();
        let hi = ev.extremal(&tree, Bound::Upper, 0, &mut em).unwrap().as_imm().unwrap();
        let lo = ev.extremal(&tree, Bound::Lower, 0, &mut em).unwrap().as_imm().unwrap();
        assert!(hi >= lo, "{expr}: {hi} < {lo}");
    }
}

/// Analyzing the same launch twice yields identical outcomes.
#[test]
fn test_analysis_is_repeatable() {
    let cat = strided_catalogue();
    let mut inv = launch("copy");
    inv.bind_arg(2, ArgValue::Const(10));
    inv.bind_arg(3, ArgValue::Const(100));
    let estimator = Estimator::new(&cat);

    let mut first = VecSink::default();
    let mut em = ConstFolder::new();
    estimator.analyze_invocation(&inv, &mut em, &mut first).unwrap();

    let mut second = VecSink::default();
    let mut em2 = ConstFolder::new();
    estimator.analyze_invocation(&inv, &mut em2, &mut second).unwrap();

    let a = serde_json::to_string(&first.accesses).unwrap();
    let b = serde_json::to_string(&second.accesses).unwrap();
    assert_eq!(a, b);
}

/// An inner loop without computable bounds flags only the accesses
/// under it; sibling accesses still get estimates.
#[test]
fn test_incomputable_inner_loop_is_contained() {
    let mut cat = Catalogue::new();
    cat.add_loop(&LoopRow {
        kernel: "k".into(),
        loop_id: 1,
        parent_loop_id: 0,
        init_tokens: toks("0"),
        final_tokens: toks("8"),
        step_tokens: toks("1"),
        known_iters: None,
    })
    .unwrap();
    cat.add_loop(&LoopRow {
        kernel: "k".into(),
        loop_id: 2,
        parent_loop_id: 1,
        init_tokens: vec![],
        final_tokens: vec![],
        step_tokens: vec![],
        known_iters: None,
    })
    .unwrap();
    cat.add_access(&AccessRow {
        kernel: "k".into(),
        access_id: 1,
        alloc_arg: 0,
        loop_id: 2,
        cond_id: 0,
        postfix_tokens: toks("TIDX"),
        prefix_tokens: toks("( GEP TIDX )"),
    });
    cat.add_access(&AccessRow {
        kernel: "k".into(),
        access_id: 2,
        alloc_arg: 0,
        loop_id: 1,
        cond_id: 0,
        postfix_tokens: toks("TIDX"),
        prefix_tokens: toks("( GEP TIDX )"),
    });

    let mut sink = VecSink::default();
    let mut em = ConstFolder::new();
    Estimator::new(&cat).analyze_invocation(&launch("k"), &mut em, &mut sink).unwrap();

    let by_id: HashMap<u32, &AccessOutcome> =
        sink.accesses.iter().map(|(k, o)| (k.access_id, o)).collect();
    assert!(matches!(by_id[&1], AccessOutcome::IncomputableLoop { loop_id: 2 }));
    let AccessOutcome::Estimate(est) = by_id[&2] else {
        panic!("sibling access should still be estimated");
    };
    assert_eq!(est.exec_count, Some(Scalar::Imm(1024 * 8)));
}

/// Second grid axis: spans and strides follow y extents.
#[test]
fn test_second_axis_uses_y_extents() {
    let mut cat = Catalogue::new();
    cat.add_access(&AccessRow {
        kernel: "k".into(),
        access_id: 1,
        alloc_arg: 0,
        loop_id: 0,
        cond_id: 0,
        postfix_tokens: toks("TIDY BIDY BDIMY MUL ADD"),
        prefix_tokens: toks("( GEP ( ADD TIDY ( MUL BIDY BDIMY ) ) )"),
    });

    let mut inv = launch("k");
    inv.grid[1] = DimValue::Const(2);
    inv.block[1] = DimValue::Const(8);

    let mut sink = VecSink::default();
    let mut em = ConstFolder::new();
    Estimator::new(&cat).analyze_invocation(&inv, &mut em, &mut sink).unwrap();

    let AccessOutcome::Estimate(est) = &sink.accesses[0].1 else {
        panic!("expected an estimate");
    };
    assert_eq!(est.working_set, WorkingSet::Span(Scalar::Imm(15)));
    assert_eq!(est.stride_bidy, Some(Scalar::Imm(8)));
    // 4*256 along x times 2*8 along y.
    assert_eq!(est.exec_count, Some(Scalar::Imm(1024 * 16)));
}

/// Deferred launch state flows through handles instead of aborting.
#[test]
fn test_runtime_grid_extent_stays_symbolic() {
    let mut cat = Catalogue::new();
    cat.add_access(&AccessRow {
        kernel: "k".into(),
        access_id: 1,
        alloc_arg: 0,
        loop_id: 0,
        cond_id: 0,
        postfix_tokens: toks("TIDX BIDX BDIMX MUL ADD"),
        prefix_tokens: toks("( GEP ( ADD TIDX ( MUL BIDX BDIMX ) ) )"),
    });

    let mut em = ConstFolder::new();
    let grid_x = em.insert(64);
    let mut inv = launch("k");
    inv.grid[0] = DimValue::Rt(grid_x);

    let mut sink = VecSink::default();
    Estimator::new(&cat).analyze_invocation(&inv, &mut em, &mut sink).unwrap();

    let AccessOutcome::Estimate(est) = &sink.accesses[0].1 else {
        panic!("expected an estimate");
    };
    let Some(Scalar::Rt(h)) = est.exec_count else {
        panic!("execution count should be deferred, got {:?}", est.exec_count);
    };
    assert_eq!(em.value(h), 64 * 256);
    let WorkingSet::Span(span) = est.working_set else {
        panic!("expected a span");
    };
    assert_eq!(em.concretize(span), 64 * 256 - 1);
}

/// Densities rank allocations for placement advice.
#[test]
fn test_density_ranking_across_allocations() {
    let mut cat = Catalogue::new();
    for (id, alloc) in [(1u32, 0u32), (2, 1)] {
        cat.add_access(&AccessRow {
            kernel: "k".into(),
            access_id: id,
            alloc_arg: alloc,
            loop_id: 0,
            cond_id: 0,
            postfix_tokens: toks("TIDX"),
            prefix_tokens: toks("( GEP TIDX )"),
        });
    }

    let mut sink = VecSink::default();
    let mut em = ConstFolder::new();
    Estimator::new(&cat).analyze_invocation(&launch("k"), &mut em, &mut sink).unwrap();

    // Same execution counts, very different sizes.
    let sizes = HashMap::from([(0u32, 1u64 << 30), (1u32, 4096u64)]);
    let ranked = rank_allocations(&sink.accesses, &sizes);
    assert_eq!(ranked[0].alloc_arg, 1);
    assert_eq!(ranked[1].alloc_arg, 0);
    assert!(ranked[0].density > ranked[1].density);
}
