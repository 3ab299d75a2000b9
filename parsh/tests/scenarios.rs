//! End-to-end scheduling scenarios against the scripted evaluator.

mod common;

use common::TestEval;
use parsh::command::{CommandTree, RedirKind};
use parsh::execute::{execute, Config};
use parsh::scheduler::SchedStats;

fn quiesced(stats: SchedStats) {
    assert_eq!(stats, SchedStats { nodes: 0, frontier: 0, versions: 0 });
}

#[test]
fn writers_of_one_file_serialize_while_others_overlap() {
    // sleep 2 > a & echo hi > b & echo done > a
    let eval = TestEval::new();
    let shell = execute(Config::process(4), eval.clone());
    let script = CommandTree::simple(["sleep", "60"])
        .redirect(RedirKind::Out, "a")
        .then(CommandTree::simple(["echo", "hi"]).redirect(RedirKind::Out, "b"))
        .then(CommandTree::simple(["echo", "done"]).redirect(RedirKind::Out, "a"));
    shell.submit(script).unwrap();
    let stats = {
        let sched = shell.scheduler().clone();
        shell.join();
        sched.stats()
    };
    quiesced(stats);

    assert_eq!(eval.file("b").as_deref(), Some("hi"));
    assert_eq!(eval.file("a").as_deref(), Some("done"));
    let sleep = eval.span("sleep 60").expect("sleep ran");
    let done = eval.span("echo done").expect("echo done ran");
    let hi = eval.span("echo hi").expect("echo hi ran");
    // The second writer of `a` waited for the first.
    assert!(done.start > sleep.end, "echo done overlapped the sleep");
    // The unrelated writer did not.
    assert!(hi.end < sleep.end, "echo hi should finish inside the sleep");
}

#[test]
fn parallel_assignments_publish_before_their_reader() {
    // x=5 ; y=10 ; echo $x$y > out
    let eval = TestEval::new();
    let shell = execute(Config::process(4), eval.clone());
    let script = CommandTree::assign("x", "5")
        .then(CommandTree::assign("y", "10"))
        .then(CommandTree::simple(["echo", "$x$y"]).redirect(RedirKind::Out, "out"));
    shell.submit(script).unwrap();
    let stats = {
        let sched = shell.scheduler().clone();
        shell.join();
        sched.stats()
    };
    quiesced(stats);
    assert_eq!(eval.file("out").as_deref(), Some("510"));
}

#[test]
fn if_expands_the_taken_branch_and_serializes_later_readers() {
    // if status 0 < a ; then cp a b ; else cp c b ; fi ; cat b
    let eval = TestEval::new();
    eval.seed_file("a", "alpha");
    eval.seed_file("c", "gamma");
    let shell = execute(Config::process(4), eval.clone());
    let script = CommandTree::If {
        test: Box::new(CommandTree::simple(["status", "0"]).redirect(RedirKind::In, "a")),
        then: Box::new(
            CommandTree::simple(["cp"])
                .redirect(RedirKind::In, "a")
                .redirect(RedirKind::Out, "b"),
        ),
        orelse: Some(Box::new(
            CommandTree::simple(["cp"])
                .redirect(RedirKind::In, "c")
                .redirect(RedirKind::Out, "b"),
        )),
    }
    .then(CommandTree::simple(["cat"]).redirect(RedirKind::In, "b"));
    shell.submit(script).unwrap();
    let stats = {
        let sched = shell.scheduler().clone();
        shell.join();
        sched.stats()
    };
    quiesced(stats);

    assert_eq!(eval.file("b").as_deref(), Some("alpha"));
    assert_eq!(eval.reads(), vec![("b".to_string(), "alpha".to_string())]);
    let cp = eval.span("cp").expect("cp ran");
    let cat = eval.span("cat").expect("cat ran");
    assert!(cat.start > cp.end, "cat must wait for the branch to write b");
    // Only the taken branch ran.
    assert_eq!(eval.spans_with_prefix("cp").len(), 1);
}

#[test]
fn while_loop_iterates_and_releases_its_dependents_on_exit() {
    // while countdown k 3 ; do echo tick >> log ; done ; echo done > log
    let eval = TestEval::new();
    let shell = execute(Config::process(4), eval.clone());
    let script = CommandTree::While {
        test: Box::new(CommandTree::simple(["countdown", "k", "3"])),
        body: Box::new(CommandTree::simple(["echo", "tick"]).redirect(RedirKind::Append, "log")),
    }
    .then(CommandTree::simple(["echo", "done"]).redirect(RedirKind::Out, "log"));
    shell.submit(script).unwrap();
    let stats = {
        let sched = shell.scheduler().clone();
        shell.join();
        sched.stats()
    };
    quiesced(stats);

    let ticks = eval.spans_with_prefix("echo tick");
    assert_eq!(ticks.len(), 3, "three successful tests, three body rounds");
    let done = eval.span("echo done").expect("echo done ran");
    for tick in &ticks {
        assert!(done.start > tick.end, "the loop's dependent fired early");
    }
    assert_eq!(eval.file("log").as_deref(), Some("done"));
}

#[test]
fn redirect_on_the_loop_itself_serializes_later_siblings() {
    // while countdown r 3 ; do sleep 15 tick ; done < input ; echo done > input
    //
    // The `< input` access lives on the loop construct, not on any body
    // command; the trailing writer of `input` must wait for the whole loop.
    let eval = TestEval::new();
    eval.seed_file("input", "lines");
    let shell = execute(Config::process(4), eval.clone());
    let script = CommandTree::While {
        test: Box::new(CommandTree::simple(["countdown", "r", "3"])),
        body: Box::new(CommandTree::simple(["sleep", "15", "tick"])),
    }
    .redirect(RedirKind::In, "input")
    .then(CommandTree::simple(["echo", "done"]).redirect(RedirKind::Out, "input"));
    shell.submit(script).unwrap();
    let stats = {
        let sched = shell.scheduler().clone();
        shell.join();
        sched.stats()
    };
    quiesced(stats);

    assert_eq!(eval.counter("r"), 4, "three passing tests and the failing one");
    let ticks = eval.spans_with_prefix("sleep 15 tick");
    assert_eq!(ticks.len(), 3);
    let done = eval.span("echo done").expect("echo done ran");
    for tick in &ticks {
        assert!(done.start > tick.end, "the loop's reader of input was still running");
    }
    assert_eq!(eval.file("input").as_deref(), Some("done"));
}

#[test]
fn redirect_wrapping_an_if_serializes_later_writers() {
    // if status 0 ; then sleep 30 branch ; fi > shared ; echo after > shared
    //
    // Narrowing the sentinel's access to the taken branch must not shed the
    // compound's own output redirection.
    let eval = TestEval::new();
    let shell = execute(Config::process(4), eval.clone());
    let script = CommandTree::If {
        test: Box::new(CommandTree::simple(["status", "0"])),
        then: Box::new(CommandTree::simple(["sleep", "30", "branch"])),
        orelse: None,
    }
    .redirect(RedirKind::Out, "shared")
    .then(CommandTree::simple(["echo", "after"]).redirect(RedirKind::Out, "shared"));
    shell.submit(script).unwrap();
    let stats = {
        let sched = shell.scheduler().clone();
        shell.join();
        sched.stats()
    };
    quiesced(stats);

    let branch = eval.span("sleep 30 branch").expect("branch ran");
    let after = eval.span("echo after").expect("echo after ran");
    assert!(after.start > branch.end, "the compound's redirect stopped serializing");
    assert_eq!(eval.file("shared").as_deref(), Some("after"));
}

#[test]
fn redirect_wrapping_an_and_serializes_later_writers() {
    // (status 0 && sleep 30 rhs) > shared ; echo trailing > shared
    let eval = TestEval::new();
    let shell = execute(Config::process(4), eval.clone());
    let script = CommandTree::And(
        Box::new(CommandTree::simple(["status", "0"])),
        Box::new(CommandTree::simple(["sleep", "30", "rhs"])),
    )
    .redirect(RedirKind::Out, "shared")
    .then(CommandTree::simple(["echo", "trailing"]).redirect(RedirKind::Out, "shared"));
    shell.submit(script).unwrap();
    let stats = {
        let sched = shell.scheduler().clone();
        shell.join();
        sched.stats()
    };
    quiesced(stats);

    let rhs = eval.span("sleep 30 rhs").expect("right side ran");
    let trailing = eval.span("echo trailing").expect("echo trailing ran");
    assert!(trailing.start > rhs.end, "the compound's redirect stopped serializing");
    assert_eq!(eval.file("shared").as_deref(), Some("trailing"));
}

#[test]
fn continue_prunes_only_the_matching_iteration() {
    // for i in 1 2 3 ; do if [ $i = 2 ] ; then continue ; fi ; echo $i > f$i ; done
    let eval = TestEval::new();
    let shell = execute(Config::process(4), eval.clone());
    let body = CommandTree::If {
        test: Box::new(CommandTree::simple(["test-eq", "$i", "2"])),
        then: Box::new(CommandTree::Continue(None)),
        orelse: None,
    }
    .then(CommandTree::simple(["echo", "$i"]).redirect(RedirKind::Out, "f$i"));
    let script = CommandTree::For {
        var: "i".to_string(),
        items: vec!["1".into(), "2".into(), "3".into()],
        body: Box::new(body),
    };
    shell.submit(script).unwrap();
    let stats = {
        let sched = shell.scheduler().clone();
        shell.join();
        sched.stats()
    };
    quiesced(stats);

    assert_eq!(eval.file("f1").as_deref(), Some("1"));
    assert_eq!(eval.file("f3").as_deref(), Some("3"));
    assert_eq!(eval.file("f2"), None, "iteration 2's body must be pruned");
}

#[test]
fn later_writer_waits_for_the_earlier_writer_only() {
    // cmd_a & cmd_b ; cmd_c  (cmd_a and cmd_c both write `log`)
    let eval = TestEval::new();
    let shell = execute(Config::process(4), eval.clone());
    let script = CommandTree::simple(["sleep", "40", "a"])
        .redirect(RedirKind::Out, "log")
        .then(CommandTree::simple(["sleep", "120", "b"]))
        .then(CommandTree::simple(["echo", "fin"]).redirect(RedirKind::Out, "log"));
    shell.submit(script).unwrap();
    let stats = {
        let sched = shell.scheduler().clone();
        shell.join();
        sched.stats()
    };
    quiesced(stats);

    let a = eval.span("sleep 40 a").expect("cmd_a ran");
    let b = eval.span("sleep 120 b").expect("cmd_b ran");
    let c = eval.span("echo fin").expect("cmd_c ran");
    assert!(c.start > a.end, "cmd_c must wait for cmd_a");
    assert!(c.end < b.end, "cmd_c must not wait for cmd_b");
}
