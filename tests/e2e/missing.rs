//! Tests for behavior around failing commands and missing files.

use super::*;

#[cfg(unix)]
#[test]
fn failure_stops_dependents() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.generate(vec![
        Op {
            title: "broken",
            command: "false".to_string(),
            inputs: vec![],
            outputs: vec!["mid"],
        },
        touch("make out", vec!["mid"], "out"),
    ])?;

    let out = space.run(&mut opgraph_command(vec!["evaluate"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "failed: broken");
    assert!(space.read("out").is_err());
    Ok(())
}

#[cfg(unix)]
#[test]
fn missing_input_runs() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.generate(vec![touch("make out", vec!["in"], "out")])?;

    let out = space.run_expect(&mut opgraph_command(vec!["evaluate"]))?;
    assert_output_contains(&out, "ran 1 operations");

    // Still missing, so still stale.
    let out = space.run_expect(&mut opgraph_command(vec!["evaluate"]))?;
    assert_output_contains(&out, "ran 1 operations");
    Ok(())
}

#[test]
fn missing_graph() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let out = space.run(&mut opgraph_command(vec!["evaluate"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "opgraph: error: ");
    Ok(())
}
