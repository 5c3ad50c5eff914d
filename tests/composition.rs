use kumiki::{
    DefinitionError, ExecutionError, PipelineDef, Returns, RunConfig, SolidDef, StepStatus,
};

fn return_one() -> SolidDef {
    SolidDef::builder("return_one")
        .lambda(|_, _| Ok(1i64))
        .unwrap()
}

fn adder() -> SolidDef {
    SolidDef::builder("adder")
        .input::<i64>("a")
        .input::<i64>("b")
        .lambda(|_, inputs| Ok(inputs.get::<i64>("a")? + inputs.get::<i64>("b")?))
        .unwrap()
}

fn multer() -> SolidDef {
    SolidDef::builder("multer")
        .input::<i64>("a")
        .input::<i64>("b")
        .lambda(|_, inputs| Ok(inputs.get::<i64>("a")? * inputs.get::<i64>("b")?))
        .unwrap()
}

fn add_one() -> SolidDef {
    let (adder, return_one) = (adder(), return_one());

    SolidDef::builder("add_one")
        .input::<i64>("num")
        .composite(|b| {
            let num = b.input("num")?;
            let one = b.call(&return_one)?;
            b.invoke(&adder, [num, one.output()?])?;
            Ok(Returns::Nothing)
        })
        .unwrap()
}

fn add_one_out() -> SolidDef {
    let (adder, return_one) = (adder(), return_one());

    SolidDef::builder("add_one_out")
        .input::<i64>("num")
        .composite(|b| {
            let num = b.input("num")?;
            let one = b.call(&return_one)?;
            Returns::single(b.invoke(&adder, [num, one.output()?])?)
        })
        .unwrap()
}

fn add_both() -> SolidDef {
    let (adder, return_one) = (adder(), return_one());

    SolidDef::builder("add_both")
        .input::<i64>("a")
        .input::<i64>("b")
        .output::<i64>("a_out")
        .output::<i64>("b_out")
        .composite(|b| {
            let (a, b_in) = (b.input("a")?, b.input("b")?);
            let one = b.call(&return_one)?.output()?;
            let a_out = b.invoke(&adder.alias("adder_a"), [a, one])?;
            let b_out = b.invoke(&adder.alias("adder_b"), [b_in, one])?;
            Returns::named([("a_out", &a_out), ("b_out", &b_out)])
        })
        .unwrap()
}

fn unit(name: &str) -> SolidDef {
    SolidDef::builder(name).lambda(|_, _| Ok(())).unwrap()
}

fn pass_through(name: &str) -> SolidDef {
    SolidDef::builder(name)
        .input_any("input")
        .lambda(|_, _| Ok(()))
        .unwrap()
}

#[test]
fn compute_two() {
    let (return_one, adder) = (return_one(), adder());
    let pipeline = PipelineDef::build("compute_two", |b| {
        let one = b.call(&return_one)?;
        b.invoke_named(&adder, [("a", &one), ("b", &one)])?;
        Ok(Returns::Nothing)
    })
    .unwrap();

    let result = pipeline.execute(&RunConfig::default()).unwrap();

    assert!(result.success());
    assert_eq!(result.value::<i64>("return_one"), Some(&1));
    assert_eq!(result.value::<i64>("adder"), Some(&2));
}

#[test]
fn compute_three_with_alias() {
    let (return_one, adder) = (return_one(), adder());
    let pipeline = PipelineDef::build("compute_three", |b| {
        let one = b.call(&return_one)?;
        let two = b.invoke_named(&adder, [("a", &one), ("b", &one)])?;
        b.invoke_named(&adder.alias("adder_2"), [("a", &two), ("b", &one)])?;
        Ok(Returns::Nothing)
    })
    .unwrap();

    assert_eq!(pipeline.solid_names(), vec!["return_one", "adder", "adder_2"]);

    let result = pipeline.execute(&RunConfig::default()).unwrap();
    assert!(result.success());
    assert_eq!(result.value::<i64>("adder"), Some(&2));
    assert_eq!(result.value::<i64>("adder_2"), Some(&3));
}

#[test]
fn composite_without_outputs() {
    let add_one = add_one();
    assert!(add_one.outputs().is_empty());
    assert!(add_one.is_composite());

    let pipeline = PipelineDef::build("add_one_pipeline", |b| {
        b.call(&add_one)?;
        Ok(Returns::Nothing)
    })
    .unwrap();

    let config = RunConfig::from_yaml(
        r#"
solids:
  add_one:
    inputs:
      num:
        value: 2
"#,
    )
    .unwrap();

    let result = pipeline.execute(&config).unwrap();
    assert!(result.success());
    assert_eq!(result.value::<i64>("add_one.return_one"), Some(&1));
    assert_eq!(result.value::<i64>("add_one.adder"), Some(&3));
}

#[test]
fn composite_with_single_output() {
    let (return_one, add_one_out) = (return_one(), add_one_out());
    assert_eq!(add_one_out.outputs()[0].name(), "result");

    let pipeline = PipelineDef::build("add_two", |b| {
        let one = b.call(&return_one)?;
        let two = b.invoke(&add_one_out, [&one])?;
        let three = b.invoke(&add_one_out, [&two])?;
        Returns::single(&three)
    })
    .unwrap();

    let result = pipeline.execute(&RunConfig::default()).unwrap();
    assert!(result.success());
    assert_eq!(result.value::<i64>("add_one_out.adder"), Some(&2));
    assert_eq!(result.value::<i64>("add_one_out_2.adder"), Some(&3));
    assert_eq!(result.pipeline_output::<i64>("result"), Some(&3));
}

#[test]
fn composite_with_declared_outputs() {
    let (return_one, add_both) = (return_one(), add_both());
    let pipeline = PipelineDef::build("both", |b| {
        let one = b.call(&return_one)?;
        let both = b.invoke(&add_both, [&one, &one])?;
        Returns::named([("a", both.get("a_out")?), ("b", both.get("b_out")?)])
    })
    .unwrap();

    let result = pipeline.execute(&RunConfig::default()).unwrap();
    assert!(result.success());
    assert_eq!(result.value::<i64>("add_both.adder_a"), Some(&2));
    assert_eq!(result.value::<i64>("add_both.adder_b"), Some(&2));
    assert_eq!(result.pipeline_output::<i64>("a"), Some(&2));
    assert_eq!(result.pipeline_output::<i64>("b"), Some(&2));
}

#[test]
fn composite_output_mismatch() {
    let return_one = return_one();
    let err = SolidDef::builder("broken")
        .output::<i64>("a_out")
        .output::<i64>("b_out")
        .composite(|b| {
            let one = b.call(&return_one)?;
            Returns::named([("a_out", &one)])
        })
        .unwrap_err();

    assert!(matches!(err, DefinitionError::OutputMismatch { .. }));
}

#[test]
fn multiple_outputs() {
    let return_one_and_two = SolidDef::builder("return_one_and_two")
        .output::<i64>("one")
        .output::<i64>("two")
        .compute(|_, _, outputs| {
            outputs.emit("one", 1i64)?;
            outputs.emit("two", 2i64)?;
            Ok(())
        })
        .unwrap();
    let return_three_and_four = SolidDef::builder("return_three_and_four")
        .output::<i64>("three")
        .output::<i64>("four")
        .compute(|_, _, outputs| {
            outputs.emit("three", 3i64)?;
            outputs.emit("four", 4i64)?;
            Ok(())
        })
        .unwrap();
    let (adder, multer, add_both) = (adder(), multer(), add_both());

    let pipeline = PipelineDef::build("multiple_outputs", |b| {
        let [one, two] = b.call(&return_one_and_two)?.unpack()?;
        let m = b.invoke(&multer, [one, two])?;

        let results = b.call(&return_three_and_four)?;
        assert_eq!(results.at(0)?, results.get("three")?);
        let a = b.invoke(&adder, [results.get("three")?, results.get("four")?])?;

        b.invoke(&add_both, [&m, &a])?;
        Ok(Returns::Nothing)
    })
    .unwrap();

    let result = pipeline.execute(&RunConfig::default()).unwrap();
    assert!(result.success());
    assert_eq!(result.output_value::<i64>("return_one_and_two", "one"), Some(&1));
    assert_eq!(result.output_value::<i64>("return_one_and_two", "two"), Some(&2));
    assert_eq!(result.value::<i64>("multer"), Some(&2));
    assert_eq!(result.value::<i64>("adder"), Some(&7));
    assert_eq!(result.value::<i64>("add_both.adder_a"), Some(&3));
    assert_eq!(result.value::<i64>("add_both.adder_b"), Some(&8));
}

#[test]
fn complex_pipeline() {
    let (sales_team_path, hr_team_path) = (unit("sales_team_path"), unit("hr_team_path"));
    let (extract, transform, load) = (
        pass_through("extract"),
        pass_through("transform"),
        pass_through("load"),
    );
    let analysis = pass_through("analysis");

    let pipeline = PipelineDef::build("complex_pipeline", |b| {
        let sales_path = b.call(&sales_team_path)?;
        let sales_data = b.invoke(&extract.alias("extract_sales"), [&sales_path])?;
        let sales = b.invoke(&transform.alias("transform_sales"), [&sales_data])?;
        b.invoke(&load.alias("load_sales"), [&sales])?;

        let hr_path = b.call(&hr_team_path)?;
        let hr_data = b.invoke(&extract.alias("extract_hr"), [&hr_path])?;
        let hr = b.invoke(&transform.alias("transform_hr"), [&hr_data])?;
        let loaded = b.invoke(&load.alias("load_hr"), [&hr])?;
        b.invoke(&analysis, [&loaded])?;
        Ok(Returns::Nothing)
    })
    .unwrap();

    let result = pipeline.execute(&RunConfig::default()).unwrap();
    assert!(result.success());
    assert_eq!(result.steps().len(), 9);
    assert!(result.step("analysis").is_some_and(|step| step.succeeded()));
}

#[test]
fn composed_pipeline() {
    let (extract, transform, load) = (
        pass_through("extract"),
        pass_through("transform"),
        pass_through("load"),
    );
    let etl = SolidDef::builder("etl")
        .input::<String>("path")
        .composite(|b| {
            let path = b.input("path")?;
            let data = b.invoke(&extract, [path])?;
            let table = b.invoke(&transform, [&data])?;
            Returns::single(b.invoke(&load, [&table])?)
        })
        .unwrap();

    let path = |name: &'static str| {
        SolidDef::builder(name)
            .lambda(move |_, _| Ok(format!("/data/{name}")))
            .unwrap()
    };
    let (sales_team_path, hr_team_path) = (path("sales_team_path"), path("hr_team_path"));
    let analysis = pass_through("analysis");

    let pipeline = PipelineDef::build("composed_pipeline", |b| {
        let sales = b.call(&sales_team_path)?;
        b.invoke(&etl.alias("sales_etl"), [&sales])?;
        let hr = b.call(&hr_team_path)?;
        let hr_table = b.invoke(&etl.alias("hr_etl"), [&hr])?;
        b.invoke(&analysis, [&hr_table])?;
        Ok(Returns::Nothing)
    })
    .unwrap();

    let result = pipeline.execute(&RunConfig::default()).unwrap();
    assert!(result.success());

    let keys: Vec<_> = result.steps().iter().map(|step| step.key()).collect();
    assert_eq!(
        keys,
        vec![
            "sales_team_path",
            "sales_etl.extract",
            "sales_etl.transform",
            "sales_etl.load",
            "hr_team_path",
            "hr_etl.extract",
            "hr_etl.transform",
            "hr_etl.load",
            "analysis",
        ]
    );
}

#[test]
fn wiring_errors_are_reported_at_definition() {
    let (return_one, adder) = (return_one(), adder());
    let shout = SolidDef::builder("shout")
        .input::<String>("text")
        .lambda(|_, inputs| Ok(inputs.get::<String>("text")?.to_uppercase()))
        .unwrap();

    let err = PipelineDef::build("typed", |b| {
        let one = b.call(&return_one)?;
        b.invoke(&shout, [&one])?;
        Ok(Returns::Nothing)
    })
    .unwrap_err();
    assert!(matches!(err, DefinitionError::TypeMismatch { .. }));

    let err = PipelineDef::build("aliases", |b| {
        let one = b.call(&return_one)?;
        b.invoke(&adder.alias("twice"), [&one, &one])?;
        b.invoke(&adder.alias("twice"), [&one, &one])?;
        Ok(Returns::Nothing)
    })
    .unwrap_err();
    assert!(matches!(err, DefinitionError::DuplicateSolidName { .. }));
}

#[test]
fn failures_are_captured() {
    let fails = SolidDef::builder("fails")
        .lambda(|_, _| -> anyhow::Result<i64> { anyhow::bail!("no data today") })
        .unwrap();
    let (return_one, adder) = (return_one(), adder());

    let pipeline = PipelineDef::build("partial", |b| {
        let bad = b.call(&fails)?;
        let one = b.call(&return_one)?;
        b.invoke(&adder, [&bad, &one])?;
        b.invoke(&adder, [&one, &one])?;
        Ok(Returns::Nothing)
    })
    .unwrap();

    let result = pipeline.execute(&RunConfig::default()).unwrap();
    assert!(!result.success());
    assert!(matches!(result.step("adder").map(|s| s.status()), Some(StepStatus::Skipped)));
    assert_eq!(result.value::<i64>("adder_2"), Some(&2));

    let failures: Vec<_> = result.failures().map(|(key, error)| (key, error.to_string())).collect();
    assert_eq!(failures, vec![("fails", "no data today".to_string())]);
    assert!(result.render_summary().contains("fails"));
}

#[test]
fn invalid_config_is_rejected() {
    let adder = adder();
    let pipeline = PipelineDef::build("configured", |b| {
        b.call(&adder)?;
        Ok(Returns::Nothing)
    })
    .unwrap();

    let config = RunConfig::new().with_input("adder", "a", 1).with_input("adder", "b", 2);
    let result = pipeline.execute(&config).unwrap();
    assert_eq!(result.value::<i64>("adder"), Some(&3));

    let config = RunConfig::new().with_input("adder", "c", 1);
    assert!(matches!(
        pipeline.execute(&config),
        Err(ExecutionError::UnknownInput { .. })
    ));

    let config = RunConfig::new().with_input("subtractor", "a", 1);
    assert!(matches!(
        pipeline.execute(&config),
        Err(ExecutionError::UnknownSolid(_))
    ));
}

#[test]
fn solid_config_and_resources() {
    #[derive(serde::Deserialize)]
    struct Scale {
        factor: i64,
    }

    let scaled = SolidDef::builder("scaled")
        .input::<i64>("num")
        .lambda(|ctx, inputs| {
            let scale: Scale = ctx.config_as()?;
            let offset = ctx.resource::<i64>("offset")?;
            Ok(inputs.get::<i64>("num")? * scale.factor + offset)
        })
        .unwrap();
    let pipeline = PipelineDef::build("scaling", |b| {
        b.call(&scaled)?;
        Ok(Returns::Nothing)
    })
    .unwrap();

    let config = RunConfig::from_json(
        r#"{"solids": {"scaled": {"inputs": {"num": {"value": 4}}, "config": {"factor": 10}}}}"#,
    )
    .unwrap();
    let resources = kumiki::Resources::new().with("offset", 2i64);

    let result = pipeline.execute_with(&config, &resources).unwrap();
    assert_eq!(result.value::<i64>("scaled"), Some(&42));

    let result = pipeline.execute(&config).unwrap();
    assert!(!result.success());
}

#[test]
fn snapshot_ids_follow_structure() {
    let (return_one, adder) = (return_one(), adder());
    let build = |name: &str, twice: bool| {
        PipelineDef::build(name, |b| {
            let one = b.call(&return_one)?;
            let two = b.invoke(&adder, [&one, &one])?;
            if twice {
                b.invoke(&adder, [&two, &one])?;
            }
            Ok(Returns::Nothing)
        })
        .unwrap()
    };

    assert_eq!(build("a", false).snapshot_id(), build("b", false).snapshot_id());
    assert_ne!(build("a", false).snapshot_id(), build("a", true).snapshot_id());
}
