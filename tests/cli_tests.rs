// tests/cli_tests.rs

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

const COMPOUNDS: &str = "\
,Standard_SMILES,Genus,NPclassif_pathway_results,bits
0,C(C)O,Alpha,Terpenoids,1 2 3
1,CO,Alpha,Alkaloids,2 3 4
2,C(C)N,Alpha,Terpenoids:Alkaloids,5 6
3,C(C)O,Alpha,Terpenoids,1 2 3
4,CO,Beta,Alkaloids,2 3 4
5,CCN,Beta,Polyketides,7
6,C,Gamma,Alkaloids,8
";

fn write_input(dir: &Path) -> Result<std::path::PathBuf, Box<dyn std::error::Error>> {
    let input = dir.join("compounds.csv");
    fs::write(&input, COMPOUNDS)?;
    Ok(input)
}

fn read_lines(path: &Path) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    Ok(fs::read_to_string(path)?.lines().map(String::from).collect())
}

#[test]
fn test_diversity_tables_written() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let input = write_input(dir.path())?;
    let output_dir = dir.path().join("results");

    let mut cmd = Command::cargo_bin("phytodiv")?;
    cmd.arg("--input")
        .arg(&input)
        .arg("--output_dir")
        .arg(&output_dir)
        .arg("--fingerprint_column")
        .arg("bits")
        .arg("--minmax")
        .arg("-q");
    cmd.assert().success();

    let fad = read_lines(&output_dir.join("fad.csv"))?;
    assert_eq!(fad[0], "Genus,FAD,MFAD,APWD,group_size,FAD_minmax,MFAD_minmax,APWD_minmax");
    // Gamma has a single compound and is left out.
    assert_eq!(fad.len(), 3);
    assert!(fad[1].starts_with("Alpha,5.000000,1.666667,0.833333,3,"));
    assert!(fad[2].starts_with("Beta,2.000000,1.000000,1.000000,2,"));

    let diversity = read_lines(&output_dir.join("pathway_diversity.csv"))?;
    assert!(diversity[0].starts_with("Genus,H,Hbc,G,J"));
    assert_eq!(diversity.len(), 4);
    assert!(diversity[3].starts_with("Gamma,0.000000,"));
    assert!(diversity[3].contains("NaN"));

    let stats = read_lines(&output_dir.join("group_pathway_stats.csv"))?;
    assert!(stats[0].starts_with("Genus,identified_compounds_count,identified_Terpenoids_count"));
    assert!(stats[1].starts_with("Alpha,4,2,"));

    assert!(!output_dir.join("rarefied_fad_means.csv").exists());
    Ok(())
}

#[test]
fn test_rarefaction_outputs() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let input = write_input(dir.path())?;
    let output_dir = dir.path().join("results");

    let mut cmd = Command::cargo_bin("phytodiv")?;
    cmd.arg("-i")
        .arg(&input)
        .arg("-o")
        .arg(&output_dir)
        .arg("--fingerprint_column")
        .arg("bits")
        .arg("--rarefy")
        .arg("2")
        .arg("--iterations")
        .arg("20")
        .arg("--seed")
        .arg("11")
        .arg("-t")
        .arg("2")
        .arg("-q");
    cmd.assert().success();

    let means = read_lines(&output_dir.join("rarefied_fad_means.csv"))?;
    assert_eq!(means[0], "Genus,FAD_Rare,MFAD_Rare,APWD_Rare");
    assert!(means.contains(&"Beta,2.000000,1.000000,1.000000".to_string()));

    let stds = read_lines(&output_dir.join("rarefied_fad_stds.csv"))?;
    assert!(stds.contains(&"Beta,0.000000,0.000000,0.000000".to_string()));

    let pathway_means = read_lines(&output_dir.join("rarefied_pathway_means.csv"))?;
    assert_eq!(pathway_means[0], "Genus,H_Rare,Hbc_Rare,G_Rare,J_Rare");
    assert!(pathway_means.iter().any(|l| l.starts_with("Beta,0.693147,")));
    assert!(output_dir.join("rarefied_pathway_stds.csv").exists());

    let failures = fs::read_to_string(output_dir.join("rarefaction_failures.csv"))?;
    assert!(failures.starts_with("Genus,metrics,error"));
    assert_eq!(failures.lines().filter(|l| l.starts_with("Gamma,")).count(), 2);
    assert!(predicate::str::contains("exceeds the 1 record(s)").eval(&failures));
    Ok(())
}

#[test]
fn test_strict_mode_rejects_singleton_groups() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let input = write_input(dir.path())?;

    let mut cmd = Command::cargo_bin("phytodiv")?;
    cmd.arg("-i")
        .arg(&input)
        .arg("-o")
        .arg(dir.path().join("results"))
        .arg("--strict")
        .arg("-q");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("group 'Gamma' has 1 unique compound(s)"));
    Ok(())
}

#[test]
fn test_missing_group_column() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let input = write_input(dir.path())?;

    let mut cmd = Command::cargo_bin("phytodiv")?;
    cmd.arg("-i")
        .arg(&input)
        .arg("-o")
        .arg(dir.path().join("results"))
        .arg("--group_column")
        .arg("Species")
        .arg("-q");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("group column 'Species' not found"));
    Ok(())
}
