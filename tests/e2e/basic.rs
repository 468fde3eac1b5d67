use super::*;

#[cfg(unix)]
#[test]
fn basic_evaluate() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "")?;
    space.generate(vec![touch("make out", vec!["in"], "out")])?;

    let out = space.run_expect(&mut opgraph_command(vec!["evaluate"]))?;
    assert_output_contains(&out, "ran 1 operations");
    assert!(space.read("out").is_ok());

    let out = space.run_expect(&mut opgraph_command(vec!["evaluate"]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[cfg(unix)]
#[test]
fn newer_input_reruns_chain() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "")?;
    space.generate(vec![
        touch("make mid", vec!["in"], "mid"),
        touch("make out", vec!["mid"], "out"),
    ])?;
    let out = space.run_expect(&mut opgraph_command(vec!["evaluate"]))?;
    assert_output_contains(&out, "ran 2 operations");

    space.set_mtime("mid", 100)?;
    space.set_mtime("out", 100)?;
    space.set_mtime("in", 200)?;
    let out = space.run_expect(&mut opgraph_command(vec!["evaluate"]))?;
    assert_output_contains(&out, "ran 2 operations");

    // Only the last step is out of date.
    space.set_mtime("out", 50)?;
    space.set_mtime("mid", 300)?;
    let out = space.run_expect(&mut opgraph_command(vec!["evaluate"]))?;
    assert_output_contains(&out, "ran 1 operations");
    Ok(())
}

#[cfg(unix)]
#[test]
fn create_subdir() -> anyhow::Result<()> {
    // The second operation writes into the directory the first one makes.
    let space = TestSpace::new()?;
    space.generate(vec![
        Op {
            title: "mkdir",
            command: "mkdir -p sub".to_string(),
            inputs: vec![],
            outputs: vec!["sub/"],
        },
        touch("make sub/out", vec![], "sub/out"),
    ])?;
    let out = space.run_expect(&mut opgraph_command(vec!["-j", "4", "evaluate"]))?;
    assert_output_contains(&out, "ran 2 operations");
    assert!(space.read("sub/out").is_ok());
    Ok(())
}

#[cfg(unix)]
#[test]
fn chdir_flag() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("in", "")?;
    space.generate(vec![touch("make out", vec!["in"], "out")])?;
    let root = space.root();
    let mut cmd = opgraph_command(vec!["-C", &root, "evaluate"]);
    let out = cmd.current_dir(std::env::temp_dir()).output()?;
    assert!(out.status.success());
    assert_output_contains(&out, "ran 1 operations");
    Ok(())
}

#[cfg(unix)]
#[test]
fn dump_graph() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.generate(vec![
        touch("make mid", vec![], "mid"),
        touch("make out", vec!["mid"], "out"),
    ])?;
    let out = space.run_expect(&mut opgraph_command(vec![
        "graph",
        ".soup/GenerateEvaluateGraph.bog",
    ]))?;
    assert_output_contains(&out, "roots: 1\n");
    assert_output_contains(&out, "1 make mid\n");
    assert_output_contains(&out, "  command: ");
    assert_output_contains(&out, "touch mid\n");
    assert_output_contains(&out, "  children: 2\n");
    Ok(())
}
