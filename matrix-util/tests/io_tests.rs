use matrix_util::common_io::*;
use matrix_util::mtx_io::read_names;

#[test]
fn gz_lines_round_trip() -> anyhow::Result<()> {
    let file = create_temp_dir_file(".txt.gz")?;
    let file = file.to_str().ok_or(anyhow::anyhow!("path"))?;

    let lines: Vec<Box<str>> = vec!["a\t1".into(), "b\t2".into(), "c\t3".into()];
    write_lines(&lines, file)?;
    assert_eq!(read_lines(file)?, lines);

    let words = read_lines_of_words_delim(file, "\t", -1)?;
    assert_eq!(words.lines.len(), 3);
    assert_eq!(words.lines[1][0].as_ref(), "b");

    let values = read_lines_of_types::<f32>(file, "\t", -1);
    assert!(values.is_err());
    Ok(())
}

#[test]
fn header_and_comments_are_handled() -> anyhow::Result<()> {
    let file = create_temp_dir_file(".tsv")?;
    let file = file.to_str().ok_or(anyhow::anyhow!("path"))?;

    let lines: Vec<Box<str>> = vec![
        "# comment".into(),
        "x\ty".into(),
        "1\t2".into(),
        "3\t4".into(),
    ];
    write_lines(&lines, file)?;

    let out = read_lines_of_types::<f32>(file, "\t", 0)?;
    assert_eq!(out.header, vec![Box::from("x"), Box::from("y")]);
    assert_eq!(out.lines, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    Ok(())
}

#[test]
fn names_take_requested_column() -> anyhow::Result<()> {
    let file = create_temp_dir_file(".tsv.gz")?;
    let file = file.to_str().ok_or(anyhow::anyhow!("path"))?;

    let lines: Vec<Box<str>> = vec![
        "ENSG01\tCD19\tGene Expression".into(),
        "ENSG02\tPAX5\tGene Expression".into(),
        "ENSG03".into(),
    ];
    write_lines(&lines, file)?;

    let names = read_names(file, 1)?;
    assert_eq!(
        names,
        vec![Box::from("CD19"), Box::from("PAX5"), Box::from("ENSG03")]
    );
    Ok(())
}
