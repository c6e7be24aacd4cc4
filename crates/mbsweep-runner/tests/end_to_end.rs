use anyhow::{anyhow, Result};
use chrono::Utc;
use mbsweep_runner::{
    discover_manifests, drive, extract_all, generate, write_block_file, write_dataset, BlockArgs,
    GenerateOptions, Invocation, Phases, RunManifest, SourceSpec, Stage, Tool, Toolchain,
};
use std::fs;
use std::path::{Path, PathBuf};

const COLUMNS: [&str; 8] = ["unique", "coverage", "H", "H*", "I", "Iw", "D", "D*"];

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "mbsweep_it_{}_{}_{}",
        tag,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    fs::create_dir_all(&dir).expect("scratch dir");
    dir
}

fn owned(values: Vec<&str>) -> Vec<String> {
    values.into_iter().map(str::to_string).collect()
}

fn galax_report(iw: &str) -> String {
    let mut text = String::from("galax 1.1\n\n");
    text.push_str(&format!("{:>16}", "treefile"));
    for c in COLUMNS {
        text.push_str(&format!("{:>10}", c));
    }
    text.push('\n');
    let rows = [
        ("run1.t", ["900", "0.95", "9.0", "8.8", "3.00", "0.30", "0.10", "0.09"]),
        ("run2.t", ["910", "0.96", "9.1", "8.9", "3.01", "0.31", "0.11", "0.10"]),
        ("merged trees", ["1810", "0.99", "9.9", "9.5", "2.90", iw, "0.12", "0.11"]),
    ];
    for (label, values) in rows {
        text.push_str(&format!("{:>16}", label));
        for v in values {
            text.push_str(&format!("{:>10}", v));
        }
        text.push('\n');
    }
    text.push_str("\nelapsed 0.2s\n");
    text
}

/// Emulates every external tool by writing the files the real one would.
fn fake_tools(call: &Invocation) -> Result<()> {
    let cwd = &call.cwd;
    match call.tool {
        Tool::Subsampler => {
            let source = PathBuf::from(call.flag_value("--inFile").ok_or_else(|| anyhow!("--inFile"))?);
            let prefix = call.flag_value("--outFile").ok_or_else(|| anyhow!("--outFile"))?;
            let number: usize = call.flag_value("--number").unwrap_or("0").parse()?;
            let iterations: usize = call.flag_value("--iterations").unwrap_or("0").parse()?;
            let stem = source
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            for n in 1..=iterations {
                let mut text = String::new();
                for s in 0..number {
                    text.push_str(&format!(">{}_{}_{}\nACGTACGTAC\n", stem, n, s));
                }
                fs::write(cwd.join(format!("{}_{}.fasta", prefix, n)), text)?;
            }
        }
        Tool::FormatConverter => {
            for input in call.flag_values("--inFile") {
                let stem = input.trim_end_matches(".fasta");
                fs::copy(cwd.join(input), cwd.join(format!("{}_conv.fasta", stem)))?;
            }
        }
        Tool::AlignmentConverter => {
            for input in call.flag_values("--inFile") {
                let stem = input.trim_end_matches(".fasta");
                fs::write(cwd.join(format!("{}.nexus", stem)), "#NEXUS\n")?;
            }
        }
        Tool::BlockGenerator => {
            let values = |flag: &str| owned(call.flag_values(flag));
            let args = BlockArgs {
                inpath: values("--inpath"),
                outfile: call.flag_value("--outfile").unwrap_or_default().to_string(),
                nst: values("--nst"),
                rates: values("--rates"),
                ngammacat: values("--ngammacat"),
                brlenspr: values("--brlenspr"),
                shapepr: values("--shapepr"),
                statefreqpr: values("--statefreqpr"),
                revmatpr: values("--revmatpr"),
                ngen: values("--ngen"),
                samplefreq: values("--samplefreq"),
                printfreq: values("--printfreq"),
                burninfrac: values("--burninfrac"),
                nchains: values("--nchains"),
                nruns: values("--nruns"),
                autoclose: values("--autoclose"),
                nowarnings: values("--nowarnings"),
                seed: values("--seed"),
            };
            write_block_file(&args, cwd)?;
        }
        Tool::McmcEngine => {
            fs::write(cwd.join("mcmc.log"), "done\n")?;
        }
        Tool::Aggregator => {
            let outfile = call.flag_value("--outfile").ok_or_else(|| anyhow!("--outfile"))?;
            let index: usize = outfile
                .trim_start_matches("samp")
                .trim_end_matches("merged")
                .parse()?;
            let case = cwd
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let base = match case.as_str() {
                "sameclone" => 1.0,
                "baseline" => 2.0,
                _ => 3.0,
            };
            let iw = format!("{:.2}", base + index as f64 / 10.0);
            fs::write(cwd.join(format!("{}.txt", outfile)), galax_report(&iw))?;
        }
    }
    Ok(())
}

fn write_sources(root: &Path) -> (PathBuf, PathBuf) {
    let same = root.join("same");
    let diff = root.join("diff");
    fs::create_dir_all(&same).unwrap();
    fs::create_dir_all(&diff).unwrap();
    fs::write(same.join("clone_freq0.10_same.fasta"), ">s1\nAAAAAAAAAA\n>s2\nAAAAAAAAAT\n").unwrap();
    fs::write(diff.join("clone_freq0.10_diff.fasta"), ">d1\nCCCCCCCCCC\n").unwrap();
    (same, diff)
}

#[test]
fn generate_drive_and_extract_one_frequency() {
    let root = scratch_dir("sweep");
    let (same, diff) = write_sources(&root);
    let toolchain = Toolchain::default();
    let options = GenerateOptions {
        output_root: root.join("out"),
        same_clone: SourceSpec {
            dir: same,
            pattern: String::new(),
        },
        diff_clone: SourceSpec {
            dir: diff,
            pattern: String::new(),
        },
        run_count: 2,
        seed: Some(7),
        insert_gap_at: None,
    };

    let report = generate(&options, &toolchain, &fake_tools).expect("generate");
    assert_eq!(report.created.len(), 3);
    assert!(report.skipped.is_empty());

    let manifests = discover_manifests(&root.join("out")).expect("discover");
    assert_eq!(manifests.len(), 3);
    for path in &manifests {
        let manifest = RunManifest::load(path).expect("manifest");
        let case = manifest.case.as_str();
        assert_eq!(
            manifest.inputs,
            vec![format!("{}_samp_1.fasta", case), format!("{}_samp_2.fasta", case)]
        );

        let result = drive(path, Phases::all(), &toolchain, &fake_tools).expect("drive");
        assert_eq!(result.stage, Stage::Postprocessed);
        // three prepare calls, one engine call, one aggregator call per input
        assert_eq!(result.invocations, 6);

        let block = fs::read_to_string(result.run_dir.join("mbblock.nexus")).unwrap();
        assert_eq!(block.matches("begin mrbayes;").count(), 2);
        assert!(block.contains(&format!("\texecute {}_samp_1_conv.nexus;\n", case)));
        assert!(block.contains("\tset autoclose=yes nowarnings=yes seed=7;\n"));

        let listing = fs::read_to_string(result.run_dir.join("samp2_listfile.txt")).unwrap();
        assert_eq!(
            listing,
            format!(
                "{c}_samp_2_conv.nexus.run1.t\n{c}_samp_2_conv.nexus.run2.t\n",
                c = case
            )
        );
    }

    let extracted = extract_all(&manifests);
    assert!(extracted.failures.is_empty(), "{:?}", extracted.failures);
    assert_eq!(extracted.rows.len(), 6);
    let mut values: Vec<(String, usize, f64)> = extracted
        .rows
        .iter()
        .map(|row| {
            let case = row.params["param.origin.prefix"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            (case, row.file_index, row.galax_information)
        })
        .collect();
    values.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    assert_eq!(
        values,
        vec![
            ("baseline".to_string(), 1, 2.1),
            ("baseline".to_string(), 2, 2.2),
            ("diffclone".to_string(), 1, 3.1),
            ("diffclone".to_string(), 2, 3.2),
            ("sameclone".to_string(), 1, 1.1),
            ("sameclone".to_string(), 2, 1.2),
        ]
    );

    let dataset = root.join("results.csv");
    write_dataset(&extracted.rows, &dataset).expect("dataset");
    let text = fs::read_to_string(&dataset).unwrap();
    let mut lines = text.lines();
    let header = lines.next().unwrap_or_default();
    assert!(header.starts_with("param.origin.is_combined,param.origin.freq,"), "{}", header);
    assert!(header.ends_with(",galax_information,file_index"), "{}", header);
    assert!(header.contains("param.origin.combine_path"));
    assert!(header.contains("param.mcmc.seed"));
    assert!(header.contains("param.fasta_to_nexus.insert_gap_at"));
    assert_eq!(lines.count(), 6);

    let again = generate(&options, &toolchain, &fake_tools).expect("second generate");
    assert!(again.created.is_empty());
    assert_eq!(again.skipped.len(), 3);

    let _ = fs::remove_dir_all(root);
}

#[test]
fn unseeded_sweep_keeps_every_manifest_column() {
    let root = scratch_dir("unseeded");
    let (same, diff) = write_sources(&root);
    let toolchain = Toolchain::default();
    let options = GenerateOptions {
        output_root: root.join("out"),
        same_clone: SourceSpec {
            dir: same,
            pattern: String::new(),
        },
        diff_clone: SourceSpec {
            dir: diff,
            pattern: String::new(),
        },
        run_count: 1,
        seed: None,
        insert_gap_at: None,
    };
    generate(&options, &toolchain, &fake_tools).expect("generate");
    let manifests = discover_manifests(&root.join("out")).expect("discover");
    for path in &manifests {
        drive(path, Phases::all(), &toolchain, &fake_tools).expect("drive");
        let block = fs::read_to_string(path.with_file_name("mbblock.nexus")).unwrap();
        assert!(block.contains("\tset autoclose=yes nowarnings=yes;\n"));
    }

    let extracted = extract_all(&manifests);
    assert!(extracted.failures.is_empty(), "{:?}", extracted.failures);
    let dataset = root.join("results.csv");
    write_dataset(&extracted.rows, &dataset).expect("dataset");
    let text = fs::read_to_string(&dataset).unwrap();
    let header: Vec<&str> = text.lines().next().unwrap_or_default().split(',').collect();
    assert!(header.contains(&"param.mcmc.seed"));
    assert!(header.contains(&"param.fasta_to_nexus.insert_gap_at"));
    assert_eq!(text.lines().count(), 4);

    let _ = fs::remove_dir_all(root);
}
