use pepquant_core::evidence::{Evidence, ProteinCandidate, Psm, Tags};
use pepquant_core::spectrum::{RawSpectrum, Spectra, SpectrumIndex};
use pepquant_core::{lfq, razor, rollup};

fn psm(spectrum: &str, peptide: &str, charge: u8, proteins: &[&str]) -> Psm {
    Psm {
        spectrum: spectrum.into(),
        run: "sample".into(),
        scannr: spectrum.into(),
        peptide: peptide.into(),
        charge,
        calcmass: 150.0 * peptide.len() as f64,
        rt: 600.0,
        probability: 0.95,
        protein: proteins[0].into(),
        mapped_proteins: proteins.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

fn candidates() -> Vec<ProteinCandidate> {
    ["A", "B"]
        .iter()
        .enumerate()
        .map(|(group, name)| ProteinCandidate {
            name: name.to_string(),
            group: group as u32 + 1,
            probability: 1.0,
            ..Default::default()
        })
        .collect()
}

fn experiment() -> Vec<Psm> {
    vec![
        psm("s1", "AAAAK", 2, &["A"]),
        psm("s2", "CCCCK", 2, &["A"]),
        psm("s3", "DDDDK", 2, &["A"]),
        psm("s4", "FFFFK", 2, &["A"]),
        psm("s5", "GGGGK", 2, &["B"]),
        // Shared ion X, reported under B by the search engine
        psm("s6", "SHAREDK", 2, &["B", "A"]),
        psm("s7", "SHAREDK", 2, &["B", "A"]),
    ]
}

#[test]
fn shared_ion_goes_to_protein_with_most_support() {
    let psms = experiment();
    let candidates = candidates();
    let razor = razor::resolve(&psms, &candidates);
    assert_eq!(razor.tnp("A"), 5);
    assert_eq!(razor.tnp("B"), 2);

    let x = psms[5].ion_form();
    let assignment = razor.get(&x).unwrap();
    assert_eq!(assignment.protein, "A");
    assert_eq!(assignment.weight, 0.5);

    let mut evidence = Evidence::new(Tags::default(), psms);
    evidence.assemble_proteins(&candidates, &razor);
    rollup::synchronize(&mut evidence);

    for psm in evidence.psms.iter().filter(|p| p.ion_form() == x) {
        assert_eq!(psm.protein, "A");
        assert!(psm.is_razor);
    }
    let ion = &evidence.ions[evidence.ion_index()[&x]];
    assert_eq!(ion.protein, "A");
    assert!(ion.is_razor);

    let proteins = evidence.protein_index();
    let a = &evidence.proteins[proteins["A"]];
    assert_eq!((a.unique_spc, a.razor_spc, a.total_spc), (4, 6, 6));
    let b = &evidence.proteins[proteins["B"]];
    assert_eq!((b.unique_spc, b.razor_spc, b.total_spc), (1, 1, 3));
}

#[test]
fn rerunning_resolution_is_stable() {
    let candidates = candidates();
    let first = razor::resolve(&experiment(), &candidates);
    let mut reversed = experiment();
    reversed.reverse();
    let second = razor::resolve(&reversed, &candidates);
    for psm in experiment() {
        let form = psm.ion_form();
        assert_eq!(first.get(&form), second.get(&form));
    }
}

/// MS1 scans containing every PSM precursor, eluting around 10 minutes
fn ms1_scans(psms: &[Psm]) -> Vec<RawSpectrum> {
    let mut mzs = psms.iter().map(|p| p.mz()).collect::<Vec<_>>();
    mzs.sort_by(|a, b| a.total_cmp(b));
    mzs.dedup();
    (0..11)
        .map(|i| {
            let rt = 9.5 + i as f32 * 0.1;
            let apex = 1.0 - (rt - 10.0).abs();
            RawSpectrum {
                id: format!("scan={}", i),
                ms_level: 1,
                scan_start_time: rt,
                mz: mzs.clone(),
                intensity: mzs.iter().map(|mz| mz * apex).collect(),
                ..Default::default()
            }
        })
        .collect()
}

#[test]
fn label_free_pipeline() {
    let psms = experiment();
    let candidates = candidates();
    let razor = razor::resolve(&psms, &candidates);
    let scans = ms1_scans(&psms);
    let mut evidence = Evidence::new(Tags::default(), psms);
    evidence.assemble_proteins(&candidates, &razor);
    rollup::synchronize(&mut evidence);

    let spectra: Spectra = std::iter::once(SpectrumIndex::new("sample", scans)).collect();
    lfq::quantify(&mut evidence, &spectra, &lfq::LfqSettings::default()).unwrap();
    lfq::rollup(&mut evidence).unwrap();

    assert!(evidence.psms.iter().all(|p| p.intensity > 0.0));
    for ion in &evidence.ions {
        let max = evidence
            .psms
            .iter()
            .filter(|p| p.ion_form() == ion.form)
            .map(|p| p.intensity)
            .fold(0.0, f64::max);
        assert_eq!(ion.intensity, max);
    }

    let proteins = evidence.protein_index();
    let a = &evidence.proteins[proteins["A"]];
    let b = &evidence.proteins[proteins["B"]];
    assert!(a.razor_intensity >= a.unique_intensity);
    assert!(a.total_intensity >= a.razor_intensity);
    assert_eq!(b.unique_intensity, b.razor_intensity);
}
