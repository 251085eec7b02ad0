#![no_main]

use h264_syntax::codec::h264::cavlc::CavlcEntropy;
use h264_syntax::codec::h264::entropy::CavlcTables;
use h264_syntax::codec::h264::entropy::ResidualBlock;
use h264_syntax::codec::h264::entropy::SyntaxElement;
use h264_syntax::codec::h264::entropy::SyntaxError;
use h264_syntax::codec::h264::nalu_reader::NaluReader;
use h264_syntax::codec::h264::params::PpsBuilder;
use h264_syntax::codec::h264::params::SliceHeaderBuilder;
use h264_syntax::codec::h264::params::SliceType;
use h264_syntax::codec::h264::params::SpsBuilder;
use h264_syntax::codec::h264::slice_data::SliceDataParser;
use libfuzzer_sys::fuzz_target;

/// Exp-Golomb stand-in for the clause 9.2 VLC tables. Not conformant, but it
/// keeps the fuzzer exploring the whole grammar without carrying the code
/// tables in the harness.
struct ExpGolombTables;

impl CavlcTables for ExpGolombTables {
    fn read_coeff_token(
        &mut self,
        reader: &mut NaluReader<'_>,
        _blk: ResidualBlock,
        max_num_coeff: usize,
    ) -> Result<(u8, u8), SyntaxError> {
        let total_coeff: u32 = reader
            .read_ue()
            .map_err(|_| SyntaxError::UnexpectedEndOfData(SyntaxElement::CoeffToken))?;
        let trailing_ones: u32 = reader
            .read_ue()
            .map_err(|_| SyntaxError::UnexpectedEndOfData(SyntaxElement::CoeffToken))?;
        let total_coeff = total_coeff.min(max_num_coeff.min(16) as u32) as u8;
        Ok((total_coeff, trailing_ones.min(u32::from(total_coeff).min(3)) as u8))
    }

    fn read_total_zeros(
        &mut self,
        reader: &mut NaluReader<'_>,
        total_coeff: u8,
        max_num_coeff: usize,
    ) -> Result<u32, SyntaxError> {
        let total_zeros: u32 = reader
            .read_ue()
            .map_err(|_| SyntaxError::UnexpectedEndOfData(SyntaxElement::TotalZeros))?;
        Ok(total_zeros.min((max_num_coeff - usize::from(total_coeff)) as u32))
    }

    fn read_run_before(
        &mut self,
        reader: &mut NaluReader<'_>,
        zeros_left: u32,
    ) -> Result<u32, SyntaxError> {
        let run: u32 = reader
            .read_ue()
            .map_err(|_| SyntaxError::UnexpectedEndOfData(SyntaxElement::RunBefore))?;
        Ok(run.min(zeros_left))
    }
}

fuzz_target!(|data: &[u8]| {
    let sps = SpsBuilder::new()
        .pic_width_in_mbs(16)
        .pic_height_in_map_units(16)
        .build();
    let pps = PpsBuilder::new(sps).transform_8x8_mode_flag(true).build();

    for slice_type in [SliceType::I, SliceType::P, SliceType::B] {
        let header = SliceHeaderBuilder::new(&pps).slice_type(slice_type).build();
        let entropy = CavlcEntropy::new(NaluReader::new(data), ExpGolombTables);
        let _ = SliceDataParser::new(&pps, &header, entropy).parse();
    }
});
