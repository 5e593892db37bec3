/// Load the historical projects, train the layout model and estimate a layout for one project.
use std::error::Error;
use std::path::PathBuf;

use clap::Parser;

mod encoder;
mod error;
mod estimate;
mod evaluate;
mod forest;
mod io;
mod model;
mod nearest;
mod plot;
mod policy;
mod preprocess;
mod reconcile;
mod solver;
mod units;

use encoder::PredictionInput;
use error::LayoutError;
use estimate::Estimator;
use evaluate::evaluate;
use forest::RandomForestParams;
use io::{load_csv, ProjectRecord};
use model::{split_rows, LayoutModel};
use policy::PolicyTable;
use preprocess::{training_rows, HistoricalTables};

/// Smallest project the estimator accepts, in square wah.
const MIN_AREA_WAH: f64 = 250.0;

#[derive(Debug, Parser)]
#[command(about = "Estimate a residential land-development layout from historical projects")]
struct Args {
    /// Historical project dataset (CSV)
    #[arg(long, default_value = "datalayout.csv")]
    data: PathBuf,

    #[arg(long)]
    province: Option<String>,

    #[arg(long)]
    grade: Option<String>,

    /// Land shape category
    #[arg(long)]
    shape: Option<String>,

    /// Project area in square wah (defaults to 7500, or the nearest project's area with --near)
    #[arg(long)]
    area_wah: Option<f64>,

    /// Pre-fill missing project fields from the project nearest to LAT LON
    #[arg(long, num_args = 2, value_names = ["LAT", "LON"], allow_negative_numbers = true)]
    near: Option<Vec<f64>>,

    /// Grade policy table (TOML)
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Fraction of projects held out for evaluation; 0 trains on every project
    #[arg(long, default_value_t = 0.2)]
    holdout: f64,

    #[arg(long, default_value_t = 100)]
    trees: usize,

    #[arg(long)]
    max_depth: Option<usize>,

    #[arg(long, default_value_t = 1)]
    min_samples_leaf: usize,

    /// Grow every tree on the full training set instead of a bootstrap sample
    #[arg(long)]
    no_bootstrap: bool,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Width of the area buckets used for historical ratio matching, in m²
    #[arg(long, default_value_t = 1.0)]
    lookup_bucket_sqm: f64,

    /// Also balance unit counts against the predicted saleable area
    #[arg(long)]
    balance: bool,

    /// Write a feature-importance chart to this PNG
    #[arg(long)]
    plot: Option<PathBuf>,
}

/// Builds the prediction input from the command line, filling gaps from the
/// nearest project when a map point was given.
fn resolve_input(args: &Args, records: &[ProjectRecord]) -> Result<PredictionInput, LayoutError> {
    let near = match args.near.as_deref() {
        Some(&[lat, lon]) => {
            let found = nearest::nearest_project(records, lat, lon);
            match found {
                Some((r, km)) => log::info!("Nearest project to ({lat}, {lon}) is {:?}, {km:.2} km away", r.project_name),
                None => log::warn!("No project has coordinates; --near ignored"),
            }
            found.map(|(r, _)| r)
        }
        _ => None,
    };

    let missing = |flag: &str| LayoutError::InvalidInput(format!("--{flag} is required unless --near finds a project"));
    let province = args
        .province
        .clone()
        .or_else(|| near.map(|r| r.province.clone()))
        .ok_or_else(|| missing("province"))?;
    let grade = args
        .grade
        .clone()
        .or_else(|| near.map(|r| r.grade.clone()))
        .ok_or_else(|| missing("grade"))?;
    let land_shape = args
        .shape
        .clone()
        .or_else(|| near.map(|r| r.land_shape.clone()))
        .ok_or_else(|| missing("shape"))?;

    let area_wah = args
        .area_wah
        .or_else(|| near.map(|r| units::sqm_to_wah(r.project_area_sqm)))
        .unwrap_or(7500.0);
    if !(area_wah >= MIN_AREA_WAH) {
        return Err(LayoutError::InvalidInput(format!(
            "project area must be at least {MIN_AREA_WAH} sq. wah, got {area_wah}"
        )));
    }

    Ok(PredictionInput {
        province,
        grade,
        land_shape,
        area_sqm: units::wah_to_sqm(area_wah),
    })
}

/// load data, derive tables, train, estimate one layout, and report accuracy
fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    let args = Args::parse();

    // 1) Load and derive the historical tables
    println!("Loading data from {}...", args.data.display());
    let records = load_csv(&args.data)?;
    let tables = HistoricalTables::derive(&records, args.lookup_bucket_sqm)?;
    let policy = match &args.policy {
        Some(path) => PolicyTable::load(path)?,
        None => PolicyTable::default(),
    };

    // 2) Train on the training partition
    let rows = training_rows(&records);
    let (train, test) = split_rows(rows, args.holdout, args.seed);
    let params = RandomForestParams::new()
        .n_trees(args.trees)
        .max_depth(args.max_depth)
        .min_samples_leaf(args.min_samples_leaf)
        .bootstrap(!args.no_bootstrap)
        .seed(args.seed);
    let model = LayoutModel::train(&train, &params)?;
    println!("Trained on {} projects ({} held out)", train.len(), test.len());

    // 3) Estimate
    let input = resolve_input(&args, &records)?;
    println!(
        "\nProject: {} / grade {} / {} / {:.0} sq. wah",
        input.province,
        input.grade,
        input.land_shape,
        units::sqm_to_wah(input.area_sqm)
    );
    let estimator = Estimator::new(&model, &tables, &policy);
    let output = estimator.estimate(&input);
    println!("\n{output}");

    if args.balance {
        let b = solver::balance_for_grade(output.saleable_area_sqm, &input.grade, &tables.averages);
        println!("Area-balanced counts for {:.0} sq. wah saleable:", units::sqm_to_wah(output.saleable_area_sqm));
        println!(
            "  townhome {}  semi-detached {}  detached {}  (off by {:.0} m²{})",
            b.townhome,
            b.semi_detached,
            b.detached,
            b.residual_sqm,
            if b.converged { "" } else { ", not converged" }
        );
    }

    // 4) Accuracy
    let report = evaluate(&model, &train, &test)?;
    println!("\nModel accuracy (training partition, optimistic):");
    println!("  MAE {:.4}   R² {:.4}", report.train.mae, report.train.r2);
    if let Some(t) = report.test {
        println!("Model accuracy (held-out partition):");
        println!("  MAE {:.4}   R² {:.4}", t.mae, t.r2);
    }

    let importances = model.feature_importances();
    println!("\nFeature importances:");
    for (name, v) in importances.iter().take(10) {
        println!("{:<30} {:>8.4}", name, v);
    }
    if let Some(path) = &args.plot {
        plot::plot_importances(path, &importances, 15)?;
        println!("Wrote {}", path.display());
    }

    Ok(())
}

/// the test functions
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    use crate::preprocess::{GradeAverages, UnitType};
    use crate::reconcile::RatioSource;

    const HEADER: &str = concat!(
        "project_name,province,grade,land_shape,project_area_sqm,saleable_area_sqm,",
        "public_area_sqm,green_area_sqm,road_area_sqm,townhome,semi_detached,detached,",
        "commercial,total_units,alley_count,latitude,longitude"
    );

    fn write_fixture(name: &str, lines: &[&str]) -> Result<PathBuf, Box<dyn Error>> {
        let path = std::env::temp_dir().join(format!("smart_layout_{}_{name}.csv", std::process::id()));
        let mut f = File::create(&path)?;
        for line in lines {
            writeln!(&mut f, "{line}")?;
        }
        Ok(path)
    }

    fn sample_dataset() -> Vec<&'static str> {
        vec![
            HEADER,
            "Alpha,Bangkok,PRIMO,square,32000,19200,12800,1600,8000,120,20,10,0,150,10,13.75,100.50",
            "Beta,Bangkok,PRIMO,long,28000,16800,11200,1400,7000,100,30,0,2,132,11,13.80,100.55",
            "Gamma,Rayong,ELITE,square,40000,26000,14000,2400,8400,0,40,60,0,100,5,12.68,101.27",
            "Delta,Rayong,ELITE,irregular,36000,23400,12600,2000,7500,0,30,50,4,84,6,12.70,101.30",
            "Echo,Chonburi,PRIMO,square,20000,12000,8000,1000,5000,90,0,0,0,90,9,,",
            "Foxtrot,Chonburi,ELITE,long,44000,28600,15400,2600,9200,10,40,70,0,120,8,13.36,100.98",
        ]
    }

    fn cleanup(path: &Path) {
        let _ = std::fs::remove_file(path);
    }

    /// IO: can read well-formed records, with optional coordinates
    #[test]
    fn test_load_csv() -> Result<(), Box<dyn Error>> {
        let path = write_fixture("load", &sample_dataset())?;
        let recs = load_csv(&path)?;
        cleanup(&path);

        assert_eq!(recs.len(), 6);
        let r = &recs[0];
        assert_eq!(r.project_name, "Alpha");
        assert_eq!(r.grade, "PRIMO");
        assert_eq!(r.townhome, 120);
        assert_eq!(r.coordinates(), Some((13.75, 100.50)));
        assert_eq!(recs[4].coordinates(), None);
        Ok(())
    }

    /// IO: Thai headers with stray whitespace map onto the same schema
    #[test]
    fn test_load_csv_thai_headers() -> Result<(), Box<dyn Error>> {
        let header = concat!(
            " ชื่อโครงการ ,จังหวัด,เกรดโครงการ,รูปร่างที่ดิน,พื้นที่โครงการ(ตรม),พื้นที่จัดจำหน่าย(ตรม),",
            "พื้นที่สาธารณะ(ตรม),พื้นที่สวน(ตรม),พื้นที่ถนน(ตรม),ทาวโฮม,บ้านแฝด,บ้านเดี่ยว,",
            "อาคารพาณิชย์,จำนวนหลัง,จำนวนซอย"
        );
        let path = write_fixture(
            "thai",
            &[header, "A,Bangkok,PRIMO,square,1600,1000,500,50,300,10.0,0,0,0,10,1"],
        )?;
        let recs = load_csv(&path)?;
        cleanup(&path);

        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].province, "Bangkok");
        assert_eq!(recs[0].townhome, 10);
        assert_eq!(recs[0].coordinates(), None);
        Ok(())
    }

    /// IO: a missing column is fatal and named
    #[test]
    fn test_load_csv_missing_columns() -> Result<(), Box<dyn Error>> {
        let path = write_fixture(
            "missing",
            &["project_name,province,grade,land_shape,project_area_sqm", "A,B,C,D,1"],
        )?;
        let err = load_csv(&path);
        cleanup(&path);

        match err {
            Err(LayoutError::MissingColumns { missing }) => {
                assert!(missing.contains(&"saleable_area_sqm".to_string()));
                assert!(missing.contains(&"total_units".to_string()));
                assert!(!missing.contains(&"latitude".to_string()));
            }
            other => panic!("expected MissingColumns, got {other:?}"),
        }
        Ok(())
    }

    /// IO: malformed rows and short rows are skipped, not fatal
    #[test]
    fn test_load_csv_skips_bad_rows() -> Result<(), Box<dyn Error>> {
        let mut lines = sample_dataset();
        lines.insert(2, "Bad,Bangkok,PRIMO,square,not-a-number,1,1,1,1,1,0,0,0,1,1,,");
        lines.insert(3, "Short,Bangkok");
        lines.insert(4, ",,,,,,,,,,,,,,,,");
        let path = write_fixture("bad", &lines)?;
        let recs = load_csv(&path)?;
        cleanup(&path);

        assert_eq!(recs.len(), 6);
        Ok(())
    }

    /// IO: a row that is not valid UTF-8 is skipped, the rest still load
    #[test]
    fn test_load_csv_skips_invalid_utf8_row() -> Result<(), Box<dyn Error>> {
        let lines = sample_dataset();
        let path = std::env::temp_dir().join(format!("smart_layout_{}_utf8.csv", std::process::id()));
        let mut f = File::create(&path)?;
        writeln!(&mut f, "{}", lines[0])?;
        writeln!(&mut f, "{}", lines[1])?;
        f.write_all(b"B\xff\xfe,Bangkok,PRIMO,long,28000,16800,11200,1400,7000,100,30,0,2,132,11,,\n")?;
        drop(f);
        let recs = load_csv(&path)?;
        cleanup(&path);

        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].project_name, "Alpha");
        Ok(())
    }

    /// PREPROCESS: one record of 1000 m² saleable and 10 townhomes gives a 100 m² townhome plot
    #[test]
    fn test_grade_average_single_record() -> Result<(), Box<dyn Error>> {
        let path = write_fixture(
            "single",
            &[HEADER, "A,Bangkok,A,square,2000,1000,800,100,400,10,0,0,0,10,1,,"],
        )?;
        let recs = load_csv(&path)?;
        cleanup(&path);

        let averages = GradeAverages::derive(&recs);
        assert_eq!(averages.plot_size("A", UnitType::Townhome), Some(100.0));
        assert_eq!(averages.plot_size("A", UnitType::SemiDetached), None);
        assert_eq!(averages.plot_size("A", UnitType::Detached), None);

        // the solver fills the gaps with the default sizes
        let b = solver::balance_for_grade(4000.0, "A", &averages);
        assert!(b.residual_sqm.is_finite());
        Ok(())
    }

    /// PREPROCESS: averages skip records with no units of the type
    #[test]
    fn test_grade_average_excludes_zero_counts() -> Result<(), Box<dyn Error>> {
        let path = write_fixture("avg", &sample_dataset())?;
        let recs = load_csv(&path)?;
        cleanup(&path);

        let averages = GradeAverages::derive(&recs);
        // PRIMO detached: only Alpha has detached units: 19200 * (10/150) / 10 = 128
        let d = averages.plot_size("PRIMO", UnitType::Detached).unwrap();
        assert!((d - 128.0).abs() < 1e-9);
        // PRIMO townhome: mean of 19200/150, 16800/132 and 12000/90
        let expected = (19200.0 / 150.0 + 16800.0 / 132.0 + 12000.0 / 90.0) / 3.0;
        let t = averages.plot_size("PRIMO", UnitType::Townhome).unwrap();
        assert!((t - expected).abs() < 1e-9);
        Ok(())
    }

    fn trained(name: &str) -> Result<(Vec<ProjectRecord>, HistoricalTables, LayoutModel), Box<dyn Error>> {
        let path = write_fixture(name, &sample_dataset())?;
        let records = load_csv(&path)?;
        cleanup(&path);
        let tables = HistoricalTables::derive(&records, 1.0)?;
        let params = RandomForestParams::new().n_trees(10).seed(1);
        let model = LayoutModel::train(&training_rows(&records), &params)?;
        Ok((records, tables, model))
    }

    /// PIPELINE: an unseen province still predicts
    #[test]
    fn test_unseen_province_predicts() -> Result<(), Box<dyn Error>> {
        let (_, tables, model) = trained("unseen")?;
        let policy = PolicyTable::default();
        let estimator = Estimator::new(&model, &tables, &policy);

        let input = PredictionInput {
            province: "Chiang Mai".into(),
            grade: "PRIMO".into(),
            land_shape: "square".into(),
            area_sqm: 30_000.0,
        };
        let (_, unseen) = model.schema().encode_checked(&input);
        assert_eq!(unseen.len(), 1);

        let out = estimator.estimate(&input);
        assert!(out.total_units.is_finite() && out.total_units >= 0.0);
        assert!(out.public_area_sqm >= 0.0 && out.saleable_area_sqm >= 0.0);
        let sum: f64 = out.units.iter().sum();
        assert!((sum - out.total_units).abs() < 1e-6);
        Ok(())
    }

    /// PIPELINE: a historical hit decides the unit mix whatever the model says
    #[test]
    fn test_historical_hit_wins() -> Result<(), Box<dyn Error>> {
        let (_, tables, model) = trained("hit")?;
        let policy = PolicyTable::default();
        let estimator = Estimator::new(&model, &tables, &policy);

        let input = PredictionInput {
            province: "Bangkok".into(),
            grade: "PRIMO".into(),
            land_shape: "square".into(),
            area_sqm: 32_000.0,
        };
        let fake = model::RawPrediction([0.4, 0.6, 0.05, 75.0, 0.0, 0.0, 0.0, 1.0]);
        let out = estimator.assemble(&input, &fake);
        assert_eq!(out.ratio_source, RatioSource::Historical);

        // Alpha's mix: 120 / 20 / 10 / 0 of 150 typed units
        let total = 75.0 * units::sqm_to_rai(32_000.0);
        assert!((out.total_units - total).abs() < 1e-9);
        let expected = [120.0, 20.0, 10.0, 0.0].map(|c| c / 150.0 * total);
        for (got, want) in out.units.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9);
        }
        Ok(())
    }

    /// PIPELINE: estimating twice gives identical output
    #[test]
    fn test_estimate_is_repeatable() -> Result<(), Box<dyn Error>> {
        let (_, tables, model) = trained("repeat")?;
        let policy = PolicyTable::from_toml_str("[grades.ELITE]\nmax = { townhome = 0.0 }\n")?;
        let estimator = Estimator::new(&model, &tables, &policy);
        let input = PredictionInput {
            province: "Rayong".into(),
            grade: "ELITE".into(),
            land_shape: "long".into(),
            area_sqm: 30_000.0,
        };
        let a = estimator.estimate(&input);
        let b = estimator.estimate(&input);
        assert_eq!(a, b);
        assert_eq!(a.ratio_source, RatioSource::Model);
        assert_eq!(a.units[UnitType::Townhome.index()], 0.0);
        Ok(())
    }

    /// EVALUATE: train and held-out metrics are reported
    #[test]
    fn test_evaluate_with_holdout() -> Result<(), Box<dyn Error>> {
        let path = write_fixture("eval", &sample_dataset())?;
        let records = load_csv(&path)?;
        cleanup(&path);

        let (train, test) = split_rows(training_rows(&records), 0.2, 42);
        assert_eq!((train.len(), test.len()), (4, 2));
        let model = LayoutModel::train(&train, &RandomForestParams::new().n_trees(10))?;
        let report = evaluate(&model, &train, &test)?;
        assert!(report.train.mae.is_finite() && report.train.mae >= 0.0);
        assert!(report.train.r2 <= 1.0 + 1e-9);
        assert!(report.test.is_some());

        let (all, none) = split_rows(training_rows(&records), 0.0, 42);
        assert_eq!((all.len(), none.len()), (6, 0));
        Ok(())
    }

    /// CLI: --near fills every missing field from the closest project
    #[test]
    fn test_resolve_input_from_nearest() -> Result<(), Box<dyn Error>> {
        let path = write_fixture("near", &sample_dataset())?;
        let records = load_csv(&path)?;
        cleanup(&path);

        let args = Args::try_parse_from(["smart_layout", "--near", "12.69", "101.28", "--grade", "PRIMO"])?;
        let input = resolve_input(&args, &records)?;
        assert_eq!(input.province, "Rayong");
        assert_eq!(input.grade, "PRIMO");
        assert_eq!(input.land_shape, "square");
        assert_eq!(input.area_sqm, 40_000.0);
        Ok(())
    }

    /// CLI: the minimum area is enforced
    #[test]
    fn test_resolve_input_rejects_small_area() -> Result<(), Box<dyn Error>> {
        let args = Args::try_parse_from([
            "smart_layout", "--province", "Bangkok", "--grade", "PRIMO", "--shape", "square", "--area-wah", "100",
        ])?;
        assert!(matches!(resolve_input(&args, &[]), Err(LayoutError::InvalidInput(_))));
        Ok(())
    }
} // end tests
